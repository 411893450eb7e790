//! Request context and access rules.
//!
//! Collection rules gate whole operations and may narrow reads and writes
//! with a filter. Field rules gate individual attributes: unreadable fields
//! are stripped from results, unwritable fields fail the write before any
//! persistence happens. A system context bypasses both layers.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{RepoError, Result};
use crate::schema::FieldDefinition;
use crate::store::{Filter, Row};

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    /// Caller id, recorded as `versionUserId`
    pub id: Value,
    /// Role names
    pub roles: Vec<String>,
}

/// Per-request context passed to every operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// Caller, if authenticated
    pub user: Option<Principal>,
    /// Locale for reads and localized writes (default locale when unset)
    pub locale: Option<String>,
    /// Whether localized reads fall back to the default locale
    pub fallback_locale: bool,
    /// Privileged context that bypasses all access rules
    pub system: bool,
}

impl RequestContext {
    /// Anonymous, unprivileged context.
    pub fn anonymous() -> Self {
        Self {
            user: None,
            locale: None,
            fallback_locale: true,
            system: false,
        }
    }

    /// Privileged context for maintenance and seeding.
    pub fn system() -> Self {
        Self {
            system: true,
            ..Self::anonymous()
        }
    }

    /// Context for an authenticated user.
    pub fn user(id: impl Into<Value>, roles: &[&str]) -> Self {
        Self {
            user: Some(Principal {
                id: id.into(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            }),
            ..Self::anonymous()
        }
    }

    /// Sets the request locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Disables default-locale fallback for localized reads.
    pub fn without_fallback(mut self) -> Self {
        self.fallback_locale = false;
        self
    }

    /// Returns true if the caller holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.user
            .as_ref()
            .is_some_and(|u| u.roles.iter().any(|r| r == role))
    }

    /// Returns the caller id, or null.
    pub fn user_id(&self) -> Value {
        self.user
            .as_ref()
            .map(|u| u.id.clone())
            .unwrap_or(Value::Null)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Outcome of a collection-level rule.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    Allow,
    Deny,
    /// Allowed only for records matching the filter
    Where(Filter),
}

/// Context-evaluated collection rule.
pub type AccessFn = Arc<dyn Fn(&RequestContext) -> AccessDecision + Send + Sync>;

/// Collection-level rule.
#[derive(Clone, Default)]
pub enum AccessRule {
    #[default]
    Allow,
    Deny,
    Check(AccessFn),
}

impl AccessRule {
    /// Builds a rule from a predicate.
    pub fn check(f: impl Fn(&RequestContext) -> AccessDecision + Send + Sync + 'static) -> Self {
        AccessRule::Check(Arc::new(f))
    }

    /// Rule that allows callers holding `role`.
    pub fn role(role: impl Into<String>) -> Self {
        let role = role.into();
        AccessRule::check(move |ctx| {
            if ctx.has_role(&role) {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny
            }
        })
    }

    /// Evaluates the rule.
    pub fn evaluate(&self, ctx: &RequestContext) -> AccessDecision {
        if ctx.system {
            return AccessDecision::Allow;
        }
        match self {
            AccessRule::Allow => AccessDecision::Allow,
            AccessRule::Deny => AccessDecision::Deny,
            AccessRule::Check(f) => f(ctx),
        }
    }
}

impl fmt::Debug for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessRule::Allow => write!(f, "Allow"),
            AccessRule::Deny => write!(f, "Deny"),
            AccessRule::Check(_) => write!(f, "Check(<fn>)"),
        }
    }
}

/// Operation gated by a collection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOperation {
    Create,
    Read,
    Update,
    Delete,
}

impl AccessOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessOperation::Create => "create",
            AccessOperation::Read => "read",
            AccessOperation::Update => "update",
            AccessOperation::Delete => "delete",
        }
    }
}

/// Collection-level rules.
#[derive(Debug, Clone, Default)]
pub struct CollectionAccess {
    pub create: AccessRule,
    pub read: AccessRule,
    pub update: AccessRule,
    pub delete: AccessRule,
}

impl CollectionAccess {
    /// Evaluates the rule for one operation.
    pub fn decide(&self, operation: AccessOperation, ctx: &RequestContext) -> AccessDecision {
        let rule = match operation {
            AccessOperation::Create => &self.create,
            AccessOperation::Read => &self.read,
            AccessOperation::Update => &self.update,
            AccessOperation::Delete => &self.delete,
        };
        rule.evaluate(ctx)
    }

    /// Resolves a write rule to the filter narrowing its targets.
    ///
    /// A denied write is an access error; a denied read is handled by the
    /// caller as an empty result.
    pub(crate) fn write_filter(
        &self,
        collection: &str,
        operation: AccessOperation,
        ctx: &RequestContext,
    ) -> Result<Filter> {
        match self.decide(operation, ctx) {
            AccessDecision::Allow => Ok(Filter::All),
            AccessDecision::Where(filter) => Ok(filter),
            AccessDecision::Deny => Err(RepoError::AccessDenied {
                collection: collection.to_string(),
                operation: operation.as_str().to_string(),
            }),
        }
    }
}

/// Context-evaluated field rule.
pub type FieldAccessFn = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Field-level rule.
#[derive(Clone, Default)]
pub enum FieldRule {
    #[default]
    Allow,
    Deny,
    /// Allowed for callers holding the role
    Role(String),
    Check(FieldAccessFn),
}

impl FieldRule {
    /// Builds a rule from a predicate.
    pub fn check(f: impl Fn(&RequestContext) -> bool + Send + Sync + 'static) -> Self {
        FieldRule::Check(Arc::new(f))
    }

    /// Returns true if the context passes the rule.
    pub fn permits(&self, ctx: &RequestContext) -> bool {
        if ctx.system {
            return true;
        }
        match self {
            FieldRule::Allow => true,
            FieldRule::Deny => false,
            FieldRule::Role(role) => ctx.has_role(role),
            FieldRule::Check(f) => f(ctx),
        }
    }
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRule::Allow => write!(f, "Allow"),
            FieldRule::Deny => write!(f, "Deny"),
            FieldRule::Role(role) => write!(f, "Role({role})"),
            FieldRule::Check(_) => write!(f, "Check(<fn>)"),
        }
    }
}

/// Read/write rules of one field.
#[derive(Debug, Clone, Default)]
pub struct FieldAccess {
    pub read: FieldRule,
    pub write: FieldRule,
}

/// Fails on the first payload key, in field declaration order, whose write
/// rule rejects the context.
pub(crate) fn check_field_writes<'a>(
    collection: &str,
    fields: impl IntoIterator<Item = &'a FieldDefinition>,
    payload: &Row,
    ctx: &RequestContext,
) -> Result<()> {
    if ctx.system {
        return Ok(());
    }
    for field in fields {
        if payload.contains_key(&field.name) && !field.access.write.permits(ctx) {
            return Err(RepoError::FieldAccessDenied {
                collection: collection.to_string(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}
