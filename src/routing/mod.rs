//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route registration (at startup):
//!     (pattern, handler)[]
//!     → method.rs (one MethodRoute per pattern, verbs attached)
//!     → radix.rs (segment trie + static index)
//!
//! Incoming request (method, path):
//!     → radix.rs (exact lookup, params bound)
//!     → method.rs (verb on the matched route?)
//!     → matcher.rs (on verb miss: every broader pattern, most specific first)
//!     → Return: handler + params, or 404 / 405
//!
//! Route rules:
//!     pattern → RouteRules
//!     → rules.rs (flattened once, merged per path via matcher.rs)
//! ```
//!
//! # Design Decisions
//! - No regex anywhere: segments are literal, `:name`/`*` or `**`
//! - Static beats placeholder beats wildcard at every level
//! - Deterministic: same input always matches the same route

pub mod matcher;
pub mod method;
pub mod radix;
pub mod rules;

pub use matcher::{RouteMatcher, RouteTable};
pub use method::{MethodKey, MethodLookup, MethodRoute, MethodRouter, MethodRouterOptions, RouteHit};
pub use radix::{NodeKind, Params, RadixRouter, RouteMatch, RouterOptions};
pub use rules::{CacheRule, ProxyRule, RedirectRule, RouteRules, RouteRulesHandler, RouteRulesMatcher};
