//! Stickiness codec — session-affinity policies to appliance directives.
//!
//! A policy either encodes completely or not at all: a policy with an
//! unknown method or a missing required parameter yields a
//! [`StickinessError`] and contributes nothing to the generated config.

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use lbgrid_core::StickinessPolicy;

/// Why a stickiness policy could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StickinessError {
    #[error("unknown stickiness method: {0}")]
    UnknownMethod(String),

    #[error("stickiness method {method} requires parameter {param}")]
    MissingParam {
        method: &'static str,
        param: &'static str,
    },

    #[error("stickiness parameter {0} is given more than once")]
    DuplicateParam(String),
}

pub type StickinessResult<T> = Result<T, StickinessError>;

/// Supported session-affinity methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StickinessMethod {
    CookieBased,
    SourceBased,
    AppSessionBased,
}

/// Schema entry for one method parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
    pub default: Option<&'static str>,
    pub description: &'static str,
}

const COOKIE_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "cookiename",
    required: true,
    default: None,
    description: "cookie inserted by the load balancer",
}];

const SOURCE_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "tablesize",
        required: false,
        default: Some("200k"),
        description: "size of the source-address stick table",
    },
    ParamSpec {
        name: "expire",
        required: false,
        default: Some("30m"),
        description: "idle time before a stick-table entry expires",
    },
];

const APP_SESSION_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "cookiename",
        required: true,
        default: None,
        description: "application cookie to learn sessions from",
    },
    ParamSpec {
        name: "length",
        required: true,
        default: None,
        description: "number of cookie characters kept",
    },
    ParamSpec {
        name: "holdtime",
        required: true,
        default: None,
        description: "idle time before a session is forgotten",
    },
    ParamSpec {
        name: "mode",
        required: false,
        default: None,
        description: "path-parameters or query-string, used with request-learn",
    },
    ParamSpec {
        name: "prefix",
        required: false,
        default: None,
        description: "match the cookie by prefix",
    },
    ParamSpec {
        name: "request-learn",
        required: false,
        default: None,
        description: "also learn sessions from client requests",
    },
];

impl StickinessMethod {
    pub const ALL: [StickinessMethod; 3] = [
        StickinessMethod::CookieBased,
        StickinessMethod::SourceBased,
        StickinessMethod::AppSessionBased,
    ];

    /// Resolve a method name, ignoring case and `-`/`_` separators.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "cookiebased" => Some(StickinessMethod::CookieBased),
            "sourcebased" => Some(StickinessMethod::SourceBased),
            "appsessionbased" => Some(StickinessMethod::AppSessionBased),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StickinessMethod::CookieBased => "cookie-based",
            StickinessMethod::SourceBased => "source-based",
            StickinessMethod::AppSessionBased => "app-session-based",
        }
    }

    pub fn params(self) -> &'static [ParamSpec] {
        match self {
            StickinessMethod::CookieBased => COOKIE_PARAMS,
            StickinessMethod::SourceBased => SOURCE_PARAMS,
            StickinessMethod::AppSessionBased => APP_SESSION_PARAMS,
        }
    }
}

/// Catalogue entry describing a method and its parameters.
#[derive(Debug, Clone, Serialize)]
pub struct MethodDescription {
    pub method: StickinessMethod,
    pub params: &'static [ParamSpec],
}

/// All supported methods with their parameter schemas.
pub fn method_catalogue() -> Vec<MethodDescription> {
    StickinessMethod::ALL
        .iter()
        .map(|m| MethodDescription {
            method: *m,
            params: m.params(),
        })
        .collect()
}

/// A validated stickiness directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StickinessDirective {
    Cookie {
        cookie_name: String,
    },
    Source {
        table_size: String,
        expire: String,
    },
    AppSession {
        cookie_name: String,
        length: String,
        hold_time: String,
        mode: Option<String>,
        prefix: bool,
        request_learn: bool,
    },
}

impl StickinessDirective {
    /// Validate a policy against its method's schema.
    pub fn parse(policy: &StickinessPolicy) -> StickinessResult<Self> {
        let method = StickinessMethod::from_name(&policy.method)
            .ok_or_else(|| StickinessError::UnknownMethod(policy.method.clone()))?;
        if let Some(name) = policy.duplicate_param() {
            return Err(StickinessError::DuplicateParam(name));
        }

        let required = |param: &'static str| {
            policy
                .param(param)
                .map(str::to_string)
                .ok_or(StickinessError::MissingParam {
                    method: method.name(),
                    param,
                })
        };

        match method {
            StickinessMethod::CookieBased => Ok(StickinessDirective::Cookie {
                cookie_name: required("cookiename")?,
            }),
            StickinessMethod::SourceBased => Ok(StickinessDirective::Source {
                table_size: policy.param("tablesize").unwrap_or("200k").to_string(),
                expire: policy.param("expire").unwrap_or("30m").to_string(),
            }),
            StickinessMethod::AppSessionBased => Ok(StickinessDirective::AppSession {
                cookie_name: required("cookiename")?,
                length: required("length")?,
                hold_time: required("holdtime")?,
                mode: policy.param("mode").map(str::to_string),
                prefix: flag(policy, &["prefix"]),
                request_learn: flag(policy, &["request-learn", "requestlearn"]),
            }),
        }
    }

    /// Config lines for this directive, each tab-indented.
    pub fn lines(&self) -> Vec<String> {
        match self {
            StickinessDirective::Cookie { cookie_name } => {
                vec![format!("\tcookie {cookie_name} insert")]
            }
            StickinessDirective::Source { table_size, expire } => vec![
                format!("\tstick-table type ip size {table_size} expire {expire}"),
                "\tstick on src".to_string(),
            ],
            StickinessDirective::AppSession {
                cookie_name,
                length,
                hold_time,
                mode,
                prefix,
                request_learn,
            } => {
                // appsession <cookie> len <length> timeout <holdtime> [prefix] [request-learn [mode <m>]]
                let mut line =
                    format!("\tappsession {cookie_name} len {length} timeout {hold_time}");
                if *prefix {
                    line.push_str(" prefix");
                }
                if *request_learn {
                    line.push_str(" request-learn");
                    if let Some(mode) = mode {
                        line.push_str(" mode ");
                        line.push_str(mode);
                    }
                }
                vec![line]
            }
        }
    }
}

fn flag(policy: &StickinessPolicy, names: &[&str]) -> bool {
    names
        .iter()
        .filter_map(|n| policy.param(n))
        .any(|v| v.eq_ignore_ascii_case("true"))
}

/// Encode one policy into its directive text (newline-separated lines).
pub fn encode(policy: &StickinessPolicy) -> StickinessResult<String> {
    Ok(StickinessDirective::parse(policy)?.lines().join("\n"))
}

/// Lines for every valid policy of a rule, in policy order.
///
/// Invalid policies are logged and skipped. An empty result means the
/// rule gets no stickiness section.
pub fn stickiness_lines(policies: &[StickinessPolicy]) -> Vec<String> {
    let mut fragments: Vec<Vec<String>> = Vec::with_capacity(policies.len());
    for policy in policies {
        match StickinessDirective::parse(policy) {
            Ok(directive) => fragments.push(directive.lines()),
            Err(e) => {
                warn!(
                    policy_id = policy.id,
                    rule_id = policy.rule_id,
                    error = %e,
                    "dropping invalid stickiness policy"
                );
            }
        }
    }
    fragments.into_iter().flatten().collect()
}
