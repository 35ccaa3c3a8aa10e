/// What a watch rule matches against: either a specific station, or any
/// occurrence of a substring in the packet's decoded info text.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WatchPattern {
    Callsign(String),
    Keyword(String),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WatchRule {
    pub pattern: WatchPattern,
    pub case_sensitive: bool,
}

impl WatchRule {
    pub fn callsign(call: impl Into<String>) -> Self {
        Self {
            pattern: WatchPattern::Callsign(call.into()),
            case_sensitive: false,
        }
    }

    pub fn keyword(text: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            pattern: WatchPattern::Keyword(text.into()),
            case_sensitive,
        }
    }

    /// `from`/`to`/`via` are the packet's station fields; `text` is its
    /// decoded info payload, if any (binary frames never match a keyword
    /// rule).
    fn matches(&self, from: &str, to: &str, via: &[String], text: Option<&str>) -> bool {
        match &self.pattern {
            WatchPattern::Callsign(call) => {
                from.eq_ignore_ascii_case(call)
                    || to.eq_ignore_ascii_case(call)
                    || via.iter().any(|v| v.eq_ignore_ascii_case(call))
            }
            WatchPattern::Keyword(needle) => {
                let Some(text) = text else { return false };
                if self.case_sensitive {
                    text.contains(needle.as_str())
                } else {
                    text.to_lowercase().contains(&needle.to_lowercase())
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchHit {
    pub rule_index: usize,
    pub from: String,
    pub to: String,
}

/// Runs every rule against one packet, returning the indices (in rule
/// order) of every rule that matched. A packet can trip more than one
/// rule; each is reported.
pub fn match_packet(
    rules: &[WatchRule],
    from: &str,
    to: &str,
    via: &[String],
    text: Option<&str>,
) -> Vec<WatchHit> {
    rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.matches(from, to, via, text))
        .map(|(rule_index, _)| WatchHit {
            rule_index,
            from: from.to_string(),
            to: to.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callsign_rule_matches_case_insensitively() {
        let rules = vec![WatchRule::callsign("n0call")];
        let hits = match_packet(&rules, "N0CALL", "APRS", &[], None);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn keyword_rule_respects_case_sensitivity() {
        let rules = vec![WatchRule::keyword("Emergency", true)];
        assert!(match_packet(&rules, "A", "B", &[], Some("an Emergency here")).is_empty());
        assert_eq!(
            match_packet(&rules, "A", "B", &[], Some("an EMERGENCY here")).len(),
            0
        );
        assert_eq!(
            match_packet(&rules, "A", "B", &[], Some("Emergency traffic")).len(),
            1
        );
    }

    #[test]
    fn via_path_trips_callsign_rule() {
        let rules = vec![WatchRule::callsign("WIDE2-1")];
        let hits = match_packet(&rules, "A", "B", &["WIDE2-1".into()], None);
        assert_eq!(hits.len(), 1);
    }
}
