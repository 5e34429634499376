//! Python 版本解析与兼容性判断

use std::sync::OnceLock;

use regex::Regex;

use crate::config::PythonSection;

/// 最低 Python 版本要求（只比较 Major.Minor）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PythonRequirement {
    pub major: u32,
    pub minor: u32,
}

impl Default for PythonRequirement {
    fn default() -> Self {
        Self { major: 3, minor: 11 }
    }
}

impl From<&PythonSection> for PythonRequirement {
    fn from(section: &PythonSection) -> Self {
        Self {
            major: section.min_major,
            minor: section.min_minor,
        }
    }
}

impl PythonRequirement {
    /// 主版本必须相等，次版本不低于要求
    pub fn accepts(&self, output: &str) -> bool {
        match parse_major_minor(output) {
            Some((major, minor)) => major == self.major && minor >= self.minor,
            None => false,
        }
    }

    /// conda create 使用的版本号，如 `3.11`
    pub fn conda_spec(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)\.(\d+)").expect("static regex"))
}

/// 从 `Python 3.11.4`、`3.12.1`、`Python 3.13.0rc1` 等文本中取出 (major, minor)
pub fn parse_major_minor(output: &str) -> Option<(u32, u32)> {
    let caps = version_pattern().captures(output)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    Some((major, minor))
}

/// 按默认要求（3.11）判断
pub fn is_python_version_compatible(output: &str) -> bool {
    PythonRequirement::default().accepts(output)
}

/// `Python 3.11.4` → `3.11.4`；无法识别时原样返回
pub fn strip_python_prefix(output: &str) -> String {
    output
        .trim()
        .strip_prefix("Python ")
        .unwrap_or_else(|| output.trim())
        .to_string()
}
