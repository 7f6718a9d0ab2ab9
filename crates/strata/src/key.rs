// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Write as _;

use serde::Serialize;
use xxhash_rust::xxh3::xxh3_128;

use crate::serializer::SerializationError;

/// Scoping applied when a key is generated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyOptions {
    /// Groups keys so they can be invalidated together.
    pub namespace: Option<String>,
    /// Keeps tenants from sharing entries.
    pub tenant: Option<String>,
}

impl KeyOptions {
    /// Options with neither a namespace nor a tenant.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scopes generated keys to `namespace`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Scopes generated keys to `tenant`.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }
}

/// Derives a cache key from a function identity and its arguments.
///
/// Equal inputs must give equal keys. The cache treats the result as opaque.
pub trait KeyGenerator<A: ?Sized>: Send + Sync + 'static {
    /// Builds the key for one call.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments cannot be encoded.
    fn generate_key(&self, identity: &str, args: &A, options: &KeyOptions) -> Result<String, SerializationError>;
}

/// Builds keys of the form `prefix[:ns:namespace][:tenant:tenant]:fn:identity:hash`.
///
/// Every scope segment is tagged, and `%` and `:` inside segment values are
/// percent-encoded, so two different scopes never produce the same key.
///
/// The hash is the 128-bit xxh3 of the arguments' JSON encoding, so any
/// `Serialize` argument type works and field order is significant.
///
/// # Examples
///
/// ```
/// use strata::{DefaultKeyGenerator, KeyGenerator, KeyOptions};
///
/// let keys = DefaultKeyGenerator::new();
/// let options = KeyOptions::new().with_namespace("users");
/// let key = keys.generate_key("load_user", &(42, "eu"), &options).unwrap();
/// assert!(key.starts_with("strata:ns:users:fn:load_user:"));
/// assert_eq!(key, keys.generate_key("load_user", &(42, "eu"), &options).unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultKeyGenerator {
    prefix: String,
}

impl Default for DefaultKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultKeyGenerator {
    /// A generator using the `strata` prefix.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefix: "strata".to_owned(),
        }
    }

    /// Replaces the leading key segment.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl<A> KeyGenerator<A> for DefaultKeyGenerator
where
    A: Serialize + ?Sized,
{
    fn generate_key(&self, identity: &str, args: &A, options: &KeyOptions) -> Result<String, SerializationError> {
        let encoded = serde_json::to_vec(args).map_err(|e| SerializationError::with_source("cannot encode key arguments", e))?;

        let mut key = String::with_capacity(self.prefix.len() + identity.len() + 64);
        key.push_str(&self.prefix);
        if let Some(namespace) = &options.namespace {
            push_segment(&mut key, "ns", namespace);
        }
        if let Some(tenant) = &options.tenant {
            push_segment(&mut key, "tenant", tenant);
        }
        push_segment(&mut key, "fn", identity);
        let _ = write!(key, ":{:032x}", xxh3_128(&encoded));
        Ok(key)
    }
}

fn push_segment(key: &mut String, tag: &str, value: &str) {
    key.push(':');
    key.push_str(tag);
    key.push(':');
    for c in value.chars() {
        match c {
            '%' => key.push_str("%25"),
            ':' => key.push_str("%3A"),
            c => key.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(KeyOptions::new(), "strata:fn:f:")]
    #[case(KeyOptions::new().with_namespace("users"), "strata:ns:users:fn:f:")]
    #[case(KeyOptions::new().with_tenant("t1"), "strata:tenant:t1:fn:f:")]
    #[case(KeyOptions::new().with_namespace("users").with_tenant("t1"), "strata:ns:users:tenant:t1:fn:f:")]
    #[case(KeyOptions::new().with_namespace("a:b"), "strata:ns:a%3Ab:fn:f:")]
    fn layout(#[case] options: KeyOptions, #[case] prefix: &str) {
        let key = DefaultKeyGenerator::new().generate_key("f", &1, &options).unwrap();
        assert!(key.starts_with(prefix), "{key}");
        assert_eq!(key.len(), prefix.len() + 32);
    }

    #[test]
    fn arguments_change_the_hash() {
        let keys = DefaultKeyGenerator::new();
        let options = KeyOptions::new();
        let a = keys.generate_key("f", &(1, 2), &options).unwrap();
        let b = keys.generate_key("f", &(2, 1), &options).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tenants_do_not_collide() {
        let keys = DefaultKeyGenerator::new();
        let a = keys.generate_key("f", "x", &KeyOptions::new().with_tenant("a")).unwrap();
        let b = keys.generate_key("f", "x", &KeyOptions::new().with_tenant("b")).unwrap();
        assert_ne!(a, b);
    }

    #[rstest]
    #[case(KeyOptions::new().with_namespace("t1"), KeyOptions::new().with_tenant("t1"))]
    #[case(KeyOptions::new().with_namespace("a:b"), KeyOptions::new().with_namespace("a").with_tenant("b"))]
    #[case(
        KeyOptions::new().with_namespace("a:tenant:b"),
        KeyOptions::new().with_namespace("a").with_tenant("b")
    )]
    #[case(KeyOptions::new().with_namespace("a%3Ab"), KeyOptions::new().with_namespace("a:b"))]
    fn distinct_scopes_do_not_collide(#[case] left: KeyOptions, #[case] right: KeyOptions) {
        let keys = DefaultKeyGenerator::new();
        let a = keys.generate_key("f", &1, &left).unwrap();
        let b = keys.generate_key("f", &1, &right).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn identity_cannot_impersonate_a_scope() {
        let keys = DefaultKeyGenerator::new();
        let scoped = keys.generate_key("f", &1, &KeyOptions::new().with_tenant("t1")).unwrap();
        let forged = keys.generate_key("t1:fn:f", &1, &KeyOptions::new()).unwrap();
        assert_ne!(scoped, forged);
    }

    #[test]
    fn custom_prefix() {
        let key = DefaultKeyGenerator::new()
            .with_prefix("app")
            .generate_key("f", &(), &KeyOptions::new())
            .unwrap();
        assert!(key.starts_with("app:fn:f:"));
    }
}
