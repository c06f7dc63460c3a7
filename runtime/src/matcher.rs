//! Request predicates for conditional middleware.
//!
//! A [`RequestMatcher`] is a conjunction of conditions on the method, headers,
//! host and path of a request. The empty matcher accepts every request.
//!
//! # Example
//!
//! ```
//! use alice_runtime::matcher::RequestMatcher;
//! use alice_runtime::{HttpError, Request};
//! use http::Method;
//!
//! let matcher = RequestMatcher::methods([Method::GET]).and(RequestMatcher::route("/users/:id"));
//!
//! assert!(matcher.matches(&Request::get("https://example.com/users/2")?));
//! assert!(!matcher.matches(&Request::get("https://example.com/teams/2")?));
//! # Ok::<(), HttpError>(())
//! ```

use crate::error::HttpError;
use crate::request::Request;
use http::{HeaderName, Method};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type StrPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;
type RequestPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// How a single string component (a header value, the host, the path) is
/// tested.
#[derive(Clone)]
pub enum StringMatch {
    /// The component is present, whatever its value
    Exist,
    /// The component equals the given string
    Exact(String),
    /// The regex finds a match somewhere in the component
    Regex(Regex),
    /// Arbitrary predicate
    Custom(StrPredicate),
}

impl StringMatch {
    /// Exact comparison.
    #[must_use]
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact(value.into())
    }

    /// Regex search.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Custom`] if `pattern` is not a valid regex.
    pub fn regex(pattern: &str) -> Result<Self, HttpError> {
        Regex::new(pattern).map(Self::Regex).map_err(HttpError::custom)
    }

    /// Arbitrary predicate.
    pub fn custom(predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(predicate))
    }

    /// Test a component that may be absent. Only [`StringMatch::Exist`]
    /// cares about presence alone; everything else needs a value.
    #[must_use]
    pub fn matches(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Self::Exist => true,
            Self::Exact(expected) => value == expected,
            Self::Regex(regex) => regex.is_match(value),
            Self::Custom(predicate) => predicate(value),
        }
    }
}

impl fmt::Debug for StringMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exist => f.write_str("Exist"),
            Self::Exact(value) => f.debug_tuple("Exact").field(value).finish(),
            Self::Regex(regex) => f.debug_tuple("Regex").field(&regex.as_str()).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A path pattern such as `/users/:id/posts`.
///
/// Literal components must match exactly and `:name` components match any
/// single non-empty component. Matching is by prefix: `/users/:id` also
/// accepts `/users/2/posts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    components: Vec<Component>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Literal(String),
    Placeholder(String),
}

impl PathTemplate {
    /// Parse a template. Empty components are ignored, so leading and
    /// trailing slashes do not matter.
    #[must_use]
    pub fn parse(template: &str) -> Self {
        let components = segments(template)
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => Component::Placeholder(name.to_string()),
                None => Component::Literal(segment.to_string()),
            })
            .collect();
        Self { components }
    }

    /// Bind placeholders against `path`, or `None` if it does not match.
    #[must_use]
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut actual = segments(path);
        let mut params = HashMap::new();
        for component in &self.components {
            let segment = actual.next()?;
            match component {
                Component::Literal(literal) if literal == segment => {},
                Component::Literal(_) => return None,
                Component::Placeholder(name) => {
                    params.insert(name.clone(), segment.to_string());
                },
            }
        }
        Some(params)
    }

    /// Whether `path` starts with this template.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

#[derive(Clone)]
enum Condition {
    Methods(Vec<Method>),
    Header(HeaderName, StringMatch),
    Host(StringMatch),
    Path(StringMatch),
    Route(PathTemplate),
    Custom(RequestPredicate),
}

impl Condition {
    fn matches(&self, request: &Request) -> bool {
        match self {
            Self::Methods(methods) => methods.contains(&request.method),
            Self::Header(name, matcher) => {
                matcher.matches(request.headers.get(name).and_then(|v| v.to_str().ok()))
            },
            Self::Host(matcher) => matcher.matches(request.host()),
            Self::Path(matcher) => matcher.matches(Some(request.path())),
            Self::Route(template) => template.matches(request.path()),
            Self::Custom(predicate) => predicate(request),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Methods(methods) => f.debug_tuple("Methods").field(methods).finish(),
            Self::Header(name, matcher) => {
                f.debug_tuple("Header").field(name).field(matcher).finish()
            },
            Self::Host(matcher) => f.debug_tuple("Host").field(matcher).finish(),
            Self::Path(matcher) => f.debug_tuple("Path").field(matcher).finish(),
            Self::Route(template) => f.debug_tuple("Route").field(template).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Conjunction of request conditions.
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    conditions: Vec<Condition>,
}

impl RequestMatcher {
    /// Matches every request.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    fn single(condition: Condition) -> Self {
        Self {
            conditions: vec![condition],
        }
    }

    /// Request method is one of `methods`.
    #[must_use]
    pub fn methods(methods: impl IntoIterator<Item = Method>) -> Self {
        Self::single(Condition::Methods(methods.into_iter().collect()))
    }

    /// Header `name` satisfies `matcher`.
    #[must_use]
    pub fn header(name: HeaderName, matcher: StringMatch) -> Self {
        Self::single(Condition::Header(name, matcher))
    }

    /// Host contains a match for the regex `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regex.
    pub fn host(pattern: &str) -> Result<Self, HttpError> {
        Ok(Self::single(Condition::Host(StringMatch::regex(pattern)?)))
    }

    /// Path contains a match for the regex `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regex.
    pub fn path(pattern: &str) -> Result<Self, HttpError> {
        Ok(Self::single(Condition::Path(StringMatch::regex(pattern)?)))
    }

    /// Path starts with the template, e.g. `/users/:id`.
    #[must_use]
    pub fn route(template: &str) -> Self {
        Self::single(Condition::Route(PathTemplate::parse(template)))
    }

    /// Arbitrary predicate over the whole request.
    pub fn custom(predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        Self::single(Condition::Custom(Arc::new(predicate)))
    }

    /// Both matchers must accept.
    #[must_use]
    pub fn and(mut self, other: Self) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    /// Whether every condition accepts `request`.
    #[must_use]
    pub fn matches(&self, request: &Request) -> bool {
        self.conditions.iter().all(|condition| condition.matches(request))
    }
}
