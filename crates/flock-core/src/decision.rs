//! Typed decision kinds and the tag-prefix descriptor convention
//!
//! Strategies propose decisions as a [`DecisionKind`]. The kind is fixed when
//! the decision is generated; the Act phase dispatches on the variant and
//! never re-reads free text. Descriptors like `allocate_resources(900)` are
//! still accepted from text-producing strategies via
//! [`DecisionKind::from_descriptor`], and every kind renders back to one.

use serde::{Deserialize, Serialize};

/// What a decision asks the swarm to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionKind {
    /// Reserve credits for an agent (or the shared pool)
    AllocateResources {
        agent_id: Option<String>,
        amount: u64,
    },
    /// Add agents to the swarm's team
    FormTeam { agent_ids: Vec<String> },
    /// Delegate a routine to the subordinate tier
    ExecuteRoutine {
        routine_id: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    /// Forward a directive to the strategy component
    AdaptStrategy { directive: String },
    /// Anything else; published as an event
    Generic { descriptor: String },
}

const ALLOCATE: &str = "allocate_resources";
const FORM_TEAM: &str = "form_team";
const EXECUTE: &str = "execute_routine";
const ADAPT: &str = "adapt_strategy";

impl DecisionKind {
    /// Parse a tag-prefixed descriptor; unrecognized or malformed text becomes `Generic`
    pub fn from_descriptor(descriptor: &str) -> Self {
        let trimmed = descriptor.trim();
        parse_tagged(trimmed).unwrap_or_else(|| Self::Generic {
            descriptor: trimmed.to_string(),
        })
    }

    /// Short tag used for logging and consensus lookups
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AllocateResources { .. } => ALLOCATE,
            Self::FormTeam { .. } => FORM_TEAM,
            Self::ExecuteRoutine { .. } => EXECUTE,
            Self::AdaptStrategy { .. } => ADAPT,
            Self::Generic { .. } => "generic",
        }
    }
}

/// Split `tag(args)` into its parts
fn split_call(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    let args = text.get(open + 1..)?.strip_suffix(')')?;
    Some((text.get(..open)?.trim(), args.trim()))
}

fn parse_tagged(text: &str) -> Option<DecisionKind> {
    let (tag, args) = split_call(text)?;

    match tag {
        ALLOCATE => {
            // allocate_resources(900) or allocate_resources(agent-1, 900)
            match args.rsplit_once(',') {
                Some((agent, amount)) => Some(DecisionKind::AllocateResources {
                    agent_id: Some(agent.trim().to_string()).filter(|a| !a.is_empty()),
                    amount: amount.trim().parse().ok()?,
                }),
                None => Some(DecisionKind::AllocateResources {
                    agent_id: None,
                    amount: args.parse().ok()?,
                }),
            }
        }
        FORM_TEAM => Some(DecisionKind::FormTeam {
            agent_ids: args
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        }),
        EXECUTE => {
            let (routine_id, params) = match args.split_once(',') {
                Some((id, rest)) => (id.trim(), serde_json::from_str(rest.trim()).ok()?),
                None => (args, serde_json::Value::Null),
            };
            if routine_id.is_empty() {
                return None;
            }
            Some(DecisionKind::ExecuteRoutine {
                routine_id: routine_id.to_string(),
                params,
            })
        }
        ADAPT => Some(DecisionKind::AdaptStrategy {
            directive: args.to_string(),
        }),
        _ => None,
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllocateResources {
                agent_id: Some(agent),
                amount,
            } => write!(f, "{}({}, {})", ALLOCATE, agent, amount),
            Self::AllocateResources {
                agent_id: None,
                amount,
            } => write!(f, "{}({})", ALLOCATE, amount),
            Self::FormTeam { agent_ids } => write!(f, "{}({})", FORM_TEAM, agent_ids.join(", ")),
            Self::ExecuteRoutine { routine_id, params } if params.is_null() => {
                write!(f, "{}({})", EXECUTE, routine_id)
            }
            Self::ExecuteRoutine { routine_id, params } => {
                write!(f, "{}({}, {})", EXECUTE, routine_id, params)
            }
            Self::AdaptStrategy { directive } => write!(f, "{}({})", ADAPT, directive),
            Self::Generic { descriptor } => write!(f, "{}", descriptor),
        }
    }
}

impl From<&str> for DecisionKind {
    fn from(descriptor: &str) -> Self {
        Self::from_descriptor(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_allocate() {
        assert_eq!(
            DecisionKind::from_descriptor("allocate_resources(900)"),
            DecisionKind::AllocateResources {
                agent_id: None,
                amount: 900
            }
        );
        assert_eq!(
            DecisionKind::from_descriptor("allocate_resources(agent-7, 250)"),
            DecisionKind::AllocateResources {
                agent_id: Some("agent-7".to_string()),
                amount: 250
            }
        );
    }

    #[test]
    fn test_parse_form_team() {
        assert_eq!(
            DecisionKind::from_descriptor("form_team(a, b,c)"),
            DecisionKind::FormTeam {
                agent_ids: vec!["a".to_string(), "b".to_string(), "c".to_string()]
            }
        );
    }

    #[test]
    fn test_parse_execute_routine_with_params() {
        let kind = DecisionKind::from_descriptor(r#"execute_routine(index-repo, {"credits": 40})"#);
        assert_eq!(
            kind,
            DecisionKind::ExecuteRoutine {
                routine_id: "index-repo".to_string(),
                params: json!({"credits": 40})
            }
        );
    }

    #[test]
    fn test_malformed_falls_back_to_generic() {
        assert!(matches!(
            DecisionKind::from_descriptor("allocate_resources(lots)"),
            DecisionKind::Generic { .. }
        ));
        assert!(matches!(
            DecisionKind::from_descriptor("execute_routine()"),
            DecisionKind::Generic { .. }
        ));
        assert!(matches!(
            DecisionKind::from_descriptor("celebrate"),
            DecisionKind::Generic { .. }
        ));
    }

    #[test]
    fn test_display_matches_convention() {
        let kind = DecisionKind::AllocateResources {
            agent_id: None,
            amount: 900,
        };
        assert_eq!(kind.to_string(), "allocate_resources(900)");

        let kind = DecisionKind::AdaptStrategy {
            directive: "narrow scope".to_string(),
        };
        assert_eq!(kind.to_string(), "adapt_strategy(narrow scope)");
        assert_eq!(DecisionKind::from_descriptor(&kind.to_string()), kind);
    }

    #[test]
    fn test_serde_tagged() {
        let kind = DecisionKind::FormTeam {
            agent_ids: vec!["x".to_string()],
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["kind"], "form_team");
    }
}
