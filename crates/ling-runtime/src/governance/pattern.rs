//! 方法名通配匹配：`*` 匹配任意序列，`?` 匹配单个字符。
//!
//! 清单与宿主规则中的 `method-pattern`（如 `get*`）都走这一实现。

/// 迭代式回溯匹配，线性扫描输入。
pub fn glob_match(pattern: &str, input: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let input: Vec<char> = input.chars().collect();
    let mut p = 0;
    let mut i = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while i < input.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == input[i]) {
            p += 1;
            i += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = i;
            p += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            mark += 1;
            i = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn literal_and_wildcards() {
        assert!(glob_match("get_user", "get_user"));
        assert!(glob_match("get*", "get_user"));
        assert!(glob_match("*user", "get_user"));
        assert!(glob_match("get?user", "get_user"));
        assert!(glob_match("*", "anything"));
        assert!(!glob_match("get*", "save_user"));
        assert!(!glob_match("get?user", "get__user"));
        assert!(!glob_match("", "x"));
        assert!(glob_match("", ""));
    }

    #[test]
    fn backtracking_across_multiple_stars() {
        assert!(glob_match("*_*_*", "a_b_c"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
    }

    proptest! {
        /// 任何输入都被 `*` 接受；模式等于输入时必然匹配。
        #[test]
        fn star_accepts_all(input in "[a-z_]{0,24}") {
            prop_assert!(glob_match("*", &input));
            prop_assert!(glob_match(&input, &input));
        }

        /// 前缀模式与 starts_with 语义一致。
        #[test]
        fn prefix_pattern_matches_prefix(prefix in "[a-z]{1,8}", rest in "[a-z]{0,8}") {
            let pattern = format!("{prefix}*");
            let input = format!("{prefix}{rest}");
            prop_assert!(glob_match(&pattern, &input));
        }
    }
}
