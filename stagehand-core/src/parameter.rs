//! Parameter store
//!
//! Parameters are named configuration values declared while the app host is
//! being described. Values come from an ordered chain of providers and are
//! resolved once, before any resource starts.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::EnvValue;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("parameter '{name}' is already declared")]
    Duplicate { name: String },
    #[error("parameter '{name}' has no value (checked: {providers})")]
    Unresolved { name: String, providers: String },
    #[error("parameter '{name}' is not declared")]
    Unknown { name: String },
}

/// A source of parameter values (environment, secret store, prompt...)
#[async_trait]
pub trait ParameterProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Look up a value. `secret` lets interactive providers hide input.
    async fn provide(&self, name: &str, secret: bool) -> Option<String>;
}

/// Reads `PARAMETERS__<NAME>` style variables from the process environment.
pub struct EnvProvider {
    prefix: String,
}

impl EnvProvider {
    pub fn new() -> Self {
        Self::with_prefix("PARAMETERS__")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// `auth0-client-id` -> `PARAMETERS__AUTH0_CLIENT_ID`
    pub fn variable_name(&self, name: &str) -> String {
        let key: String = name
            .chars()
            .map(|c| match c {
                '-' | '.' | ':' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.prefix, key)
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParameterProvider for EnvProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn provide(&self, name: &str, _secret: bool) -> Option<String> {
        std::env::var(self.variable_name(name))
            .ok()
            .filter(|v| !v.is_empty())
    }
}

/// Fixed values, e.g. defaults from the app-host file.
#[derive(Default)]
pub struct StaticProvider {
    values: BTreeMap<String, String>,
}

impl StaticProvider {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl ParameterProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn provide(&self, name: &str, _secret: bool) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Handle to a declared parameter
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParameterRef {
    name: Arc<str>,
    secret: bool,
}

impl ParameterRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }
}

#[derive(Clone, Debug)]
pub struct ParameterDecl {
    pub name: String,
    pub secret: bool,
    pub description: Option<String>,
}

impl ParameterDecl {
    pub fn new(name: impl Into<String>, secret: bool) -> Self {
        Self {
            name: name.into(),
            secret,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Values of every declared parameter, resolved once before startup.
#[derive(Clone, Debug, Default)]
pub struct ResolvedParameters {
    values: BTreeMap<String, EnvValue>,
}

impl ResolvedParameters {
    pub fn get(&self, name: &str) -> Option<&EnvValue> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: EnvValue) {
        self.values.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Default)]
pub struct ParameterStore {
    decls: BTreeMap<String, ParameterDecl>,
    providers: Vec<Box<dyn ParameterProvider>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider. Providers are consulted in insertion order.
    pub fn with_provider(mut self, provider: impl ParameterProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn add_provider(&mut self, provider: Box<dyn ParameterProvider>) {
        self.providers.push(provider);
    }

    pub fn declare(&mut self, name: &str, secret: bool) -> Result<ParameterRef, ParameterError> {
        self.declare_with(ParameterDecl::new(name, secret))
    }

    pub fn declare_with(&mut self, decl: ParameterDecl) -> Result<ParameterRef, ParameterError> {
        if self.decls.contains_key(&decl.name) {
            return Err(ParameterError::Duplicate { name: decl.name });
        }
        let handle = ParameterRef {
            name: Arc::from(decl.name.as_str()),
            secret: decl.secret,
        };
        tracing::debug!(parameter = %decl.name, secret = decl.secret, "declared parameter");
        self.decls.insert(decl.name.clone(), decl);
        Ok(handle)
    }

    pub fn get(&self, name: &str) -> Option<ParameterRef> {
        self.decls.get(name).map(|d| ParameterRef {
            name: Arc::from(d.name.as_str()),
            secret: d.secret,
        })
    }

    pub fn declarations(&self) -> impl Iterator<Item = &ParameterDecl> {
        self.decls.values()
    }

    pub async fn resolve(&self, param: &ParameterRef) -> Result<EnvValue, ParameterError> {
        let decl = self
            .decls
            .get(param.name())
            .ok_or_else(|| ParameterError::Unknown {
                name: param.name().to_string(),
            })?;

        for provider in &self.providers {
            if let Some(value) = provider.provide(&decl.name, decl.secret).await {
                tracing::debug!(
                    parameter = %decl.name,
                    provider = provider.name(),
                    "resolved parameter"
                );
                return Ok(if decl.secret {
                    EnvValue::secret(value)
                } else {
                    EnvValue::plain(value)
                });
            }
        }

        Err(ParameterError::Unresolved {
            name: decl.name.clone(),
            providers: self.provider_names(),
        })
    }

    /// Resolve every declared parameter. Stops at the first one with no value.
    pub async fn resolve_all(&self) -> Result<ResolvedParameters, ParameterError> {
        let mut resolved = ResolvedParameters::default();
        for decl in self.decls.values() {
            let param = ParameterRef {
                name: Arc::from(decl.name.as_str()),
                secret: decl.secret,
            };
            let value = self.resolve(&param).await?;
            resolved.insert(decl.name.clone(), value);
        }
        Ok(resolved)
    }

    fn provider_names(&self) -> String {
        if self.providers.is_empty() {
            return "no providers".into();
        }
        self.providers
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
