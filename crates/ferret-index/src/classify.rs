//! Path-based test code classification.

use glob::{MatchOptions, Pattern};

use crate::config::{ConfigError, TestsConfig};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Which rules flagged a path as test code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestSignals {
    pub by_extension: bool,
    pub by_directory: bool,
    pub by_filename: bool,
}

impl TestSignals {
    #[must_use]
    pub fn is_test(self) -> bool {
        self.by_extension || self.by_directory || self.by_filename
    }
}

/// Compiled test-path rules. Pure and case-insensitive; `\` is treated as `/`.
#[derive(Debug, Clone)]
pub struct TestClassifier {
    extensions: Vec<String>,
    directories: Vec<String>,
    globs: Vec<Pattern>,
}

impl TestClassifier {
    /// # Errors
    ///
    /// Returns [`ConfigError::Glob`] for a malformed filename pattern and
    /// [`ConfigError::Invalid`] for empty entries.
    pub fn new(config: &TestsConfig) -> Result<Self, ConfigError> {
        let mut extensions = Vec::with_capacity(config.extensions.len());
        for ext in &config.extensions {
            let ext = ext.trim().to_lowercase();
            if ext.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "tests.extensions",
                    reason: "empty entry".into(),
                });
            }
            extensions.push(ext);
        }

        let mut directories = Vec::with_capacity(config.directories.len());
        for dir in &config.directories {
            let dir = dir.trim().trim_matches(['/', '\\']).to_lowercase();
            if dir.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "tests.directories",
                    reason: "empty entry".into(),
                });
            }
            directories.push(dir);
        }

        let globs = config
            .filename_globs
            .iter()
            .map(|g| {
                Pattern::new(g.trim()).map_err(|e| ConfigError::Glob {
                    pattern: g.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            extensions,
            directories,
            globs,
        })
    }

    #[must_use]
    pub fn classify(&self, path: &str) -> TestSignals {
        let normalized = path.replace('\\', "/").to_lowercase();
        let mut segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let Some(filename) = segments.pop() else {
            return TestSignals::default();
        };

        TestSignals {
            by_extension: self
                .extensions
                .iter()
                .any(|ext| filename.ends_with(ext.as_str()) && filename.len() > ext.len()),
            by_directory: segments
                .iter()
                .any(|seg| self.directories.iter().any(|d| d == seg)),
            by_filename: self
                .globs
                .iter()
                .any(|p| p.matches_with(filename, MATCH_OPTIONS)),
        }
    }

    #[must_use]
    pub fn is_test(&self, path: &str) -> bool {
        self.classify(path).is_test()
    }
}

impl Default for TestClassifier {
    fn default() -> Self {
        Self::new(&TestsConfig::default()).unwrap_or_else(|_| Self {
            extensions: Vec::new(),
            directories: Vec::new(),
            globs: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> TestClassifier {
        TestClassifier::new(&TestsConfig::default()).unwrap()
    }

    #[test]
    fn directory_and_filename_both_flag() {
        let signals = classifier().classify("src/foo/tests/bar_test.cpp");
        assert!(signals.by_directory);
        assert!(signals.by_filename);
        assert!(signals.is_test());
    }

    #[test]
    fn production_file_not_test() {
        let c = classifier();
        assert!(!c.is_test("src/engine/parser.cpp"));
        assert!(!c.is_test("src/testing_utils.rs"));
        assert!(!c.is_test("src/contest/main.go"));
    }

    #[test]
    fn case_insensitive_and_backslashes() {
        let c = classifier();
        assert!(c.is_test(r"SRC\Tests\Widget.cpp"));
        assert!(c.is_test("lib/Parser_Test.CC"));
        assert!(c.is_test("web/__TESTS__/app.jsx"));
    }

    #[test]
    fn extension_rule() {
        let signals = classifier().classify("web/components/button.spec.ts");
        assert!(signals.by_extension);
        assert!(signals.by_filename);
    }

    #[test]
    fn filename_prefix_glob() {
        let signals = classifier().classify("pkg/test_helpers.py");
        assert!(signals.by_filename);
        assert!(!signals.by_directory);
    }

    #[test]
    fn gtest_directories() {
        let c = classifier();
        assert!(c.is_test("third_party/googletest/src/gtest.cc"));
        assert!(c.is_test("unittests/math.cpp"));
    }

    #[test]
    fn directory_rule_ignores_filename_segment() {
        assert!(!classifier().classify("src/tests").by_directory);
    }

    #[test]
    fn custom_config() {
        let config = TestsConfig {
            extensions: vec![".check.rs".into()],
            directories: vec!["/qa/".into()],
            filename_globs: vec![],
        };
        let c = TestClassifier::new(&config).unwrap();
        assert!(c.is_test("qa/smoke.rs"));
        assert!(c.is_test("src/lib.check.rs"));
        assert!(!c.is_test("src/foo_test.rs"));
    }

    #[test]
    fn invalid_glob_rejected() {
        let config = TestsConfig {
            filename_globs: vec!["[oops".into()],
            ..TestsConfig::default()
        };
        assert!(matches!(
            TestClassifier::new(&config),
            Err(ConfigError::Glob { .. })
        ));
    }

    #[test]
    fn empty_entries_rejected() {
        let config = TestsConfig {
            directories: vec!["  ".into()],
            ..TestsConfig::default()
        };
        assert!(TestClassifier::new(&config).is_err());
    }
}
