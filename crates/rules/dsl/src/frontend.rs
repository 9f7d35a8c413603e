use std::path::Path;

use ruleweave_rules::{Rule, RuleError, RuleFrontend};
use tracing::warn;

use crate::Parser;

/// A [`RuleFrontend`] for `*.rules` files.
#[derive(Debug, Clone, Default)]
pub struct DslFrontend {
    parser: Parser,
}

impl DslFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a configured parser, for example one that checks function names.
    #[must_use]
    pub fn with_parser(mut self, parser: Parser) -> Self {
        self.parser = parser;
        self
    }
}

impl RuleFrontend for DslFrontend {
    fn extensions(&self) -> &[&str] {
        &["rules"]
    }

    fn parse(&self, content: &str) -> Result<Vec<Rule>, RuleError> {
        Ok(self.parser.parse(content)?)
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<Rule>, RuleError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RuleError::Load(format!("cannot read {}: {e}", path.display())))?;
        self.parser.parse(&content).map_err(|e| {
            warn!(file = %path.display(), error = %e, "rule file rejected");
            RuleError::Parse(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn extensions_are_rules() {
        assert_eq!(DslFrontend::new().extensions(), &["rules"]);
    }

    #[test]
    fn parse_maps_errors() {
        let err = DslFrontend::new().parse("rule {").unwrap_err();
        assert!(matches!(err, RuleError::Parse(_)));
    }

    #[test]
    fn parse_file_reads_and_parses() {
        let mut file = tempfile::Builder::new().suffix(".rules").tempfile().unwrap();
        writeln!(file, "rule tick {{ then halt; }}").unwrap();
        let rules = DslFrontend::new().parse_file(file.path()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "tick");
    }

    #[test]
    fn parse_file_missing_is_a_load_error() {
        let result = DslFrontend::new().parse_file(Path::new("/nonexistent/a.rules"));
        assert!(matches!(result, Err(RuleError::Load(_))));
    }

    #[test]
    fn configured_parser_checks_functions() {
        let frontend =
            DslFrontend::new().with_parser(Parser::new().with_known_functions(["notify"]));
        assert!(frontend.parse("rule a { then notify(1); }").is_ok());
        assert!(frontend.parse("rule a { then page(1); }").is_err());
    }
}
