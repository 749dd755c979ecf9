//! breeze-router: Zero-dependency Radix Trie route matcher
//!
//! Resolves a live request path to the pattern it was registered under.
//! The breeze host uses it as the native matcher: the dispatch core only
//! ever sees the resolved `registeredPath` plus the captured parameters.
//!
//! ## Path Syntax
//! - `:name` - Named parameter (captures one segment)
//! - `*` or `*name` - Wildcard (captures remaining path)
//!
//! ## Priority
//! 1. Exact static match (highest)
//! 2. Parameter match
//! 3. Wildcard match (lowest)
//!
//! ## Example
//! ```
//! use breeze_router::Router;
//!
//! let mut router = Router::new();
//! router.insert("GET", "/users", "/users");
//! router.insert("GET", "/users/:id", "/users/:id");
//!
//! let m = router.find("GET", "/users/123").unwrap();
//! assert_eq!(m.value, "/users/:id");
//! assert_eq!(m.params, vec![("id".to_string(), "123".to_string())]);
//! ```

use std::collections::HashMap;

/// Route match result
#[derive(Debug, Clone, PartialEq)]
pub struct Match<T> {
    /// Value stored for the matched route
    pub value: T,
    /// Captured path parameters as (name, value) pairs
    pub params: Vec<(String, String)>,
}

impl<T> Match<T> {
    /// Get params as HashMap for convenient access
    pub fn params_map(&self) -> HashMap<String, String> {
        self.params.iter().cloned().collect()
    }
}

/// One parsed pattern segment
enum Segment<'a> {
    Static(&'a str),
    Param(&'a str),
    CatchAll(&'a str),
}

impl<'a> Segment<'a> {
    fn parse(raw: &'a str) -> Self {
        if let Some(name) = raw.strip_prefix(':') {
            Segment::Param(name)
        } else if let Some(name) = raw.strip_prefix('*') {
            Segment::CatchAll(if name.is_empty() { "*" } else { name })
        } else {
            Segment::Static(raw)
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[derive(Debug)]
struct Node<T> {
    statics: HashMap<String, Node<T>>,
    /// `:name` child; one per position, the first name registered wins
    param: Option<(String, Box<Node<T>>)>,
    /// `*name` terminal
    catch_all: Option<(String, T)>,
    value: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            statics: HashMap::new(),
            param: None,
            catch_all: None,
            value: None,
        }
    }
}

impl<T> Node<T> {
    /// Store `value` at the end of `path`; true when the slot was empty
    fn insert(&mut self, path: &[&str], value: T) -> bool {
        let Some((&raw, rest)) = path.split_first() else {
            return self.value.replace(value).is_none();
        };
        match Segment::parse(raw) {
            Segment::Static(literal) => self
                .statics
                .entry(literal.to_string())
                .or_default()
                .insert(rest, value),
            Segment::Param(name) => {
                let (_, child) = self
                    .param
                    .get_or_insert_with(|| (name.to_string(), Box::default()));
                child.insert(rest, value)
            }
            // anything after a catch-all is unreachable
            Segment::CatchAll(name) => self.catch_all.replace((name.to_string(), value)).is_none(),
        }
    }

    /// Depth-first lookup in static > param > catch-all order. `captured`
    /// holds parameters on the current branch only.
    fn lookup<'n>(&'n self, path: &[&str], captured: &mut Vec<(String, String)>) -> Option<&'n T> {
        let Some((&segment, rest)) = path.split_first() else {
            return self.value.as_ref();
        };

        if let Some(found) = self.statics.get(segment).and_then(|child| child.lookup(rest, captured)) {
            return Some(found);
        }

        if let Some((name, child)) = &self.param {
            captured.push((name.clone(), segment.to_string()));
            if let Some(found) = child.lookup(rest, captured) {
                return Some(found);
            }
            captured.pop();
        }

        let (name, value) = self.catch_all.as_ref()?;
        captured.push((name.clone(), path.join("/")));
        Some(value)
    }
}

/// Radix Trie route matcher
///
/// One tree per HTTP method (upper-cased), matched segment by segment.
#[derive(Debug)]
pub struct Router<T> {
    trees: HashMap<String, Node<T>>,
    len: usize,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self {
            trees: HashMap::new(),
            len: 0,
        }
    }
}

impl<T: Clone> Router<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route, replacing any value already stored for the same
    /// method and pattern.
    ///
    /// # Example
    /// ```
    /// use breeze_router::Router;
    ///
    /// let mut router = Router::new();
    /// router.insert("GET", "/users/:id", 0u32);
    /// router.insert("POST", "/users", 1u32);
    /// assert_eq!(router.len(), 2);
    /// ```
    pub fn insert(&mut self, method: &str, path: &str, value: T) {
        let tree = self.trees.entry(method.to_uppercase()).or_default();
        if tree.insert(&segments(path), value) {
            self.len += 1;
        }
    }

    /// Resolve a live path
    ///
    /// # Example
    /// ```
    /// use breeze_router::Router;
    ///
    /// let mut router = Router::new();
    /// router.insert("GET", "/files/*path", "files");
    ///
    /// let m = router.find("GET", "/files/a/b.txt").unwrap();
    /// assert_eq!(m.value, "files");
    /// assert_eq!(m.params[0], ("path".to_string(), "a/b.txt".to_string()));
    /// ```
    pub fn find(&self, method: &str, path: &str) -> Option<Match<T>> {
        let tree = self.trees.get(&method.to_uppercase())?;
        let mut params = Vec::new();
        let value = tree.lookup(&segments(path), &mut params)?.clone();
        Some(Match { value, params })
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.trees.contains_key(&method.to_uppercase())
    }

    /// Number of distinct (method, pattern) routes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
