use std::env;

/// 读取布尔型环境变量：支持 true/false/1/0（大小写不敏感）
pub fn env_is_true(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1"
        }
        Err(_) => default,
    }
}

/// 读取字符串环境变量，若不存在则返回默认值
pub fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) => v,
        Err(_) => default.to_string(),
    }
}

/// 读取非空字符串环境变量
pub fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 读取 i64 环境变量，不存在或解析失败返回默认值
pub fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(v) => v.trim().parse::<i64>().ok().unwrap_or(default),
        Err(_) => default,
    }
}

/// 读取 f64 环境变量，不存在或解析失败返回默认值
pub fn env_f64(key: &str, default: f64) -> f64 {
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|x| x.is_finite())
            .unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_helpers_fallback() {
        let key = "RUST_QUANT_AI_TEST_ENV_HELPERS";
        env::remove_var(key);
        assert!(env_is_true(key, true));
        assert_eq!(env_i64(key, 7), 7);
        assert_eq!(env_non_empty(key), None);

        env::set_var(key, " 1 ");
        assert!(env_is_true(key, false));
        assert_eq!(env_i64(key, 7), 1);
        assert_eq!(env_f64(key, 0.5), 1.0);

        env::set_var(key, "abc");
        assert_eq!(env_f64(key, 0.5), 0.5);
        env::remove_var(key);
    }
}
