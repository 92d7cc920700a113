//! Entity path parsing
//!
//! An entity path is a comma-separated list of `key=value` items, for
//! example `callable=add,instance_required`. A bare key maps to an empty
//! value. Values may reference environment variables in any of the forms
//! `%VAR%`, `$ENV:VAR`, `${VAR}` and `$VAR`; `CD`/`PWD` resolve to the
//! current directory. Unresolved references are left as written.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use crate::error::XllrError;

/// Parsed entity path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityPath {
    items: BTreeMap<String, String>,
}

impl EntityPath {
    pub fn parse(path: &str) -> Result<Self, XllrError> {
        let mut items = BTreeMap::new();
        for item in path.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let mut parts = item.split('=');
            let key = parts.next().unwrap_or_default().trim();
            let value = parts.next().map(str::trim).unwrap_or_default();
            if parts.next().is_some() {
                return Err(XllrError::InvalidEntityPath(format!(
                    "'{}' contains too many '='",
                    item
                )));
            }
            if key.is_empty() {
                return Err(XllrError::InvalidEntityPath(format!("'{}' has an empty key", item)));
            }
            items.insert(key.to_string(), expand_env(value));
        }
        Ok(Self { items })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromStr for EntityPath {
    type Err = XllrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if value.is_empty() {
                write!(f, "{}", key)?;
            } else {
                write!(f, "{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

/// Expand environment references using the process environment
pub fn expand_env(input: &str) -> String {
    expand_env_with(input, |name| {
        if name.eq_ignore_ascii_case("CD") || name.eq_ignore_ascii_case("PWD") {
            return std::env::current_dir()
                .ok()
                .map(|dir| dir.to_string_lossy().into_owned());
        }
        std::env::var(name).ok()
    })
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Expand environment references with a custom lookup
pub fn expand_env_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '%' => {
                if let Some(end) = chars[i + 1..].iter().position(|&c| c == '%') {
                    let name: String = chars[i + 1..i + 1 + end].iter().collect();
                    if !name.is_empty() && name.chars().all(|c| is_name_char(c) || "().-".contains(c)) {
                        if let Some(value) = lookup(&name) {
                            out.push_str(&value);
                            i += end + 2;
                            continue;
                        }
                    }
                }
                out.push('%');
                i += 1;
            }
            '$' if chars.get(i + 1) == Some(&'{') => {
                if let Some(end) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + end].iter().collect();
                    if let Some(value) = lookup(&name) {
                        out.push_str(&value);
                        i += end + 3;
                        continue;
                    }
                }
                out.push('$');
                i += 1;
            }
            '$' => {
                let rest: String = chars[i + 1..].iter().collect();
                let (prefix, start) = if rest.starts_with("ENV:") { (5, i + 5) } else { (1, i + 1) };
                let len = chars[start..].iter().take_while(|&&c| is_name_char(c)).count();
                let name: String = chars[start..start + len].iter().collect();
                let valid = match name.chars().next() {
                    Some(first) if prefix == 5 => first.is_ascii_alphabetic() || first == '_',
                    Some(first) => (first.is_ascii_alphabetic() || first == '_') && len >= 2,
                    None => false,
                };
                if valid {
                    if let Some(value) = lookup(&name) {
                        out.push_str(&value);
                        i = start + len;
                        continue;
                    }
                }
                out.push('$');
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
