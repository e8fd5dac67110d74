//! AI 回复解析：思维链 + JSON 决策数组

use serde_json::Value;

use crate::trading::ai::decision::{Decision, RawDecision};

/// 解析结果；`decisions` 只包含通过校验的条目
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    pub cot_trace: String,
    pub decision_json: String,
    pub decisions: Vec<Decision>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyError {
    /// 解析失败，附带已解析的部分
    Invalid { message: String, partial: ParsedReply },
    Empty { partial: ParsedReply },
}

/// 全角标点替换为半角
fn normalize_json(text: &str) -> String {
    text.replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{ff3b}', "[")
        .replace('\u{ff3d}', "]")
        .replace('\u{ff5b}', "{")
        .replace('\u{ff5d}', "}")
        .replace('\u{ff1a}', ":")
        .replace('\u{ff0c}', ",")
}

/// 优先 ```json 代码块，否则取最后一个顶层 `[...]`；返回 (思维链, JSON 文本)
pub fn split_reply(reply: &str) -> Option<(String, String)> {
    if let Some(start) = reply.find("```json") {
        let body_start = start + "```json".len();
        let body_end = reply[body_start..].find("```")? + body_start;
        return Some((
            reply[..start].trim().to_string(),
            reply[body_start..body_end].trim().to_string(),
        ));
    }

    // 结束位置最靠后的平衡数组；结束位置相同时取最外层
    let mut best: Option<(usize, usize)> = None;
    for (start, _) in reply.match_indices('[') {
        if let Some(end) = matching_bracket(reply, start) {
            if best.map_or(true, |(_, best_end)| end > best_end) {
                best = Some((start, end));
            }
        }
    }
    let (start, end) = best?;
    Some((
        reply[..start].trim().to_string(),
        reply[start..=end].trim().to_string(),
    ))
}

/// 从 `start` 处的 `[` 向后找配对的 `]`，跳过 JSON 字符串内容
fn matching_bracket(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_reply(reply: &str) -> Result<ParsedReply, ReplyError> {
    let Some((cot_trace, json_text)) = split_reply(reply) else {
        return Err(ReplyError::Invalid {
            message: "未找到决策JSON".to_string(),
            partial: ParsedReply {
                cot_trace: reply.trim().to_string(),
                ..Default::default()
            },
        });
    };

    let mut partial = ParsedReply {
        cot_trace,
        decision_json: json_text.clone(),
        decisions: Vec::new(),
    };

    let items: Vec<Value> = match serde_json::from_str(&normalize_json(&json_text)) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            return Err(ReplyError::Invalid {
                message: "决策JSON不是数组".to_string(),
                partial,
            })
        }
        Err(e) => {
            return Err(ReplyError::Invalid {
                message: format!("决策JSON解析失败: {}", e),
                partial,
            })
        }
    };

    let mut errors = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        let parsed = serde_json::from_value::<RawDecision>(item)
            .map_err(|e| e.to_string())
            .and_then(|raw| Decision::try_from(raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(decision) => partial.decisions.push(decision),
            Err(e) => errors.push(format!("第{}条: {}", i + 1, e)),
        }
    }

    if !errors.is_empty() {
        return Err(ReplyError::Invalid {
            message: errors.join("; "),
            partial,
        });
    }
    if partial.decisions.is_empty() {
        return Err(ReplyError::Empty { partial });
    }
    Ok(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::ai::decision::DecisionAction;

    #[test]
    fn test_fenced_block() {
        let reply = "BTC 站稳均线，考虑做多。\n```json\n[{\"symbol\":\"BTCUSDT\",\"action\":\"open_long\",\"leverage\":5,\"position_size_usd\":100,\"stop_loss\":90,\"take_profit\":120,\"reasoning\":\"趋势\"}]\n```\n";
        let parsed = parse_reply(reply).unwrap();
        assert_eq!(parsed.cot_trace, "BTC 站稳均线，考虑做多。");
        assert_eq!(parsed.decisions.len(), 1);
        assert!(matches!(parsed.decisions[0].action, DecisionAction::OpenLong(_)));
    }

    #[test]
    fn test_last_bare_array_and_fullwidth() {
        let reply = "参考区间 [1, 2] 之后\n[{“symbol”：“ETHUSDT”，“action”：“wait”}]";
        let parsed = parse_reply(reply).unwrap();
        assert_eq!(parsed.cot_trace, "参考区间 [1, 2] 之后");
        assert_eq!(parsed.decisions[0].symbol, "ETHUSDT");
    }

    #[test]
    fn test_brackets_inside_strings_do_not_end_array() {
        let reply = "分析 [草稿\n[{\"symbol\":\"BTCUSDT\",\"action\":\"hold\",\"reasoning\":\"区间 [95, 100] 未破] 继续\\\" 观察\"}]";
        let (cot, json) = split_reply(reply).unwrap();
        assert_eq!(cot, "分析 [草稿");
        assert!(json.ends_with("观察\"}]"));

        let parsed = parse_reply(reply).unwrap();
        assert_eq!(parsed.decisions.len(), 1);
        assert_eq!(parsed.decisions[0].reasoning, "区间 [95, 100] 未破] 继续\" 观察");
    }

    #[test]
    fn test_errors_keep_partial() {
        let reply = "分析\n```json\n[{\"symbol\":\"BTCUSDT\",\"action\":\"hold\"},{\"symbol\":\"ETHUSDT\",\"action\":\"moon\"}]\n```";
        match parse_reply(reply) {
            Err(ReplyError::Invalid { message, partial }) => {
                assert!(message.contains("第2条"));
                assert_eq!(partial.decisions.len(), 1);
                assert_eq!(partial.cot_trace, "分析");
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(
            parse_reply("```json\n[]\n```"),
            Err(ReplyError::Empty { .. })
        ));
        assert!(matches!(
            parse_reply("没有任何决策"),
            Err(ReplyError::Invalid { .. })
        ));
    }
}
