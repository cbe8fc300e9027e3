//! Validated repair configuration and its JSON/YAML loader.
//!
//! Configuration files are parsed into raw serde structures first, then
//! converted into typed rules. Every glob and regex is compiled during that
//! conversion, so a `RepairConfig` that exists is always usable: the rest of
//! the crate never re-validates or re-interprets pattern strings.
//!
//! ```yaml
//! exclude: ["libtorch_cpu*.so*"]
//! exclude_regex: ["^pkg/vendor/"]
//! so_configs:
//!   "_native*.so":
//!     rpath: "$ORIGIN/lib"
//!     replace:
//!       - ["libc10*.so", "libc10.so"]
//!       - ['r"^libfoo\.so\..*$"', "libbar.so"]
//!       - [{ regex: '^libgomp-(\w+)\.so\.1$' }, "libgomp.so.1"]
//!     remove_needed: ["libcuda.so.1"]
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::{RepairError, Result};

/// One rule selecting archive entries to drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionRule {
    /// Shell glob; implicitly suffix-anchored unless it starts with `*`.
    Glob(String),
    /// Unanchored regex searched within the relative path.
    Regex(String),
}

/// Pattern selecting declared dependency names for a rename.
#[derive(Debug, Clone)]
pub enum NamePattern {
    Literal(GlobMatcher),
    Regex(Regex),
}

impl NamePattern {
    pub fn literal(glob: &str) -> Result<Self> {
        Ok(Self::Literal(compile_glob(glob, "rename pattern")?))
    }

    pub fn regex(expr: &str) -> Result<Self> {
        let regex = Regex::new(expr)
            .map_err(|e| RepairError::Config(format!("rename regex {expr:?}: {e}")))?;
        Ok(Self::Regex(regex))
    }

    /// Regex patterns must match at the start of the name.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Literal(glob) => glob.is_match(name),
            Self::Regex(regex) => regex.find(name).is_some_and(|m| m.start() == 0),
        }
    }

    /// New dependency name for a matched `name`.
    #[must_use]
    pub fn rewrite(&self, name: &str, replacement: &str) -> String {
        match self {
            Self::Literal(_) => replacement.to_string(),
            Self::Regex(regex) => regex.replace_all(name, replacement).into_owned(),
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(glob) => write!(f, "glob {}", glob.glob()),
            Self::Regex(regex) => write!(f, "regex {}", regex.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenameRule {
    pub pattern: NamePattern,
    /// Literal name for globs; `$1`/`${name}` template for regexes.
    pub replacement: String,
}

/// Dynamic-section edits for shared objects matching one `so_configs` key.
#[derive(Debug, Clone, Default)]
pub struct SoConfig {
    pub rpath: Option<String>,
    pub replace: Vec<RenameRule>,
    pub remove_needed: Vec<String>,
}

/// A `so_configs` key compiled against base file names.
#[derive(Debug, Clone)]
pub struct SoConfigEntry {
    pub pattern: GlobMatcher,
    pub config: SoConfig,
}

impl SoConfigEntry {
    pub fn new(pattern: &str, config: SoConfig) -> Result<Self> {
        Ok(Self {
            pattern: compile_glob(pattern, "so_configs key")?,
            config,
        })
    }
}

/// Complete, validated configuration for one repair run.
#[derive(Debug, Clone, Default)]
pub struct RepairConfig {
    /// Glob rules followed by regex rules.
    pub exclude: Vec<ExclusionRule>,
    /// Per-object settings in declaration order.
    pub so_configs: Vec<SoConfigEntry>,
}

impl RepairConfig {
    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| RepairError::io(path, e))?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "json" => Self::from_json_str(&text),
            "yaml" | "yml" => Self::from_yaml_str(&text),
            other => Err(RepairError::Config(format!(
                "unsupported config format {other:?} for {}",
                path.display()
            ))),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(text)
            .map_err(|e| RepairError::Config(format!("JSON: {e}")))?;
        Self::try_from(raw)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(text)
            .map_err(|e| RepairError::Config(format!("YAML: {e}")))?;
        Self::try_from(raw)
    }
}

pub(crate) fn compile_glob(pattern: &str, what: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| RepairError::Config(format!("{what} {pattern:?}: {e}")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    exclude: Vec<String>,
    exclude_regex: Vec<String>,
    #[serde(deserialize_with = "ordered_map")]
    so_configs: Vec<(String, RawSoConfig)>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSoConfig {
    rpath: Option<String>,
    #[serde(default)]
    replace: Vec<(RawPattern, String)>,
    #[serde(default)]
    remove_needed: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Plain(String),
    Tagged(TaggedPattern),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TaggedPattern {
    Glob(String),
    Regex(String),
}

// Keeps document order, which decides first-match-wins for so_configs.
fn ordered_map<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, RawSoConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedMap;

    impl<'de> Visitor<'de> for OrderedMap {
        type Value = Vec<(String, RawSoConfig)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping of glob patterns to shared-object settings")
        }

        fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(entry) = access.next_entry::<String, RawSoConfig>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedMap)
}

impl TryFrom<RawConfig> for RepairConfig {
    type Error = RepairError;

    fn try_from(raw: RawConfig) -> Result<Self> {
        let mut exclude = Vec::with_capacity(raw.exclude.len() + raw.exclude_regex.len());
        for pattern in raw.exclude {
            compile_glob(&pattern, "exclude glob")?;
            exclude.push(ExclusionRule::Glob(pattern));
        }
        for expr in raw.exclude_regex {
            Regex::new(&expr)
                .map_err(|e| RepairError::Config(format!("exclude_regex {expr:?}: {e}")))?;
            exclude.push(ExclusionRule::Regex(expr));
        }

        let mut so_configs: Vec<SoConfigEntry> = Vec::with_capacity(raw.so_configs.len());
        for (key, raw_so) in raw.so_configs {
            if so_configs.iter().any(|e| e.pattern.glob().glob() == key) {
                return Err(RepairError::Config(format!(
                    "duplicate so_configs key {key:?}"
                )));
            }
            let config = SoConfig::try_from(raw_so)?;
            so_configs.push(SoConfigEntry::new(&key, config)?);
        }

        Ok(Self {
            exclude,
            so_configs,
        })
    }
}

impl TryFrom<RawSoConfig> for SoConfig {
    type Error = RepairError;

    fn try_from(raw: RawSoConfig) -> Result<Self> {
        let mut replace = Vec::with_capacity(raw.replace.len());
        for (pattern, replacement) in raw.replace {
            let rule = match pattern {
                RawPattern::Plain(text) => match legacy_regex(&text) {
                    Some(expr) => RenameRule {
                        pattern: NamePattern::regex(expr)?,
                        replacement: legacy_template(&replacement),
                    },
                    None => RenameRule {
                        pattern: NamePattern::literal(&text)?,
                        replacement,
                    },
                },
                RawPattern::Tagged(TaggedPattern::Glob(glob)) => RenameRule {
                    pattern: NamePattern::literal(&glob)?,
                    replacement,
                },
                RawPattern::Tagged(TaggedPattern::Regex(expr)) => RenameRule {
                    pattern: NamePattern::regex(&expr)?,
                    replacement,
                },
            };
            replace.push(rule);
        }
        Ok(Self {
            rpath: raw.rpath,
            replace,
            remove_needed: raw.remove_needed,
        })
    }
}

/// `r"<expr>"` inside a plain string marks a regex.
fn legacy_regex(text: &str) -> Option<&str> {
    text.strip_prefix("r\"")?.strip_suffix('"')
}

/// Rewrite a `\1` / `\g<name>` template into the `${1}` / `${name}` form.
fn legacy_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{group}}}"));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|&c| c != '>').collect();
                        out.push_str(&format!("${{{name}}}"));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}
