//! Tokens identify what should be resolved, instance names identify one resolved instance.

use std::{
    any::TypeId,
    fmt::{self, Debug, Display},
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    errors::DiError,
    types::{ErasedArgs, InjectionArgs, Service},
};

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum TokenKey {
    /// Implicit token of a type
    Type(TypeId),
    /// Explicitly created token
    Unique(u64),
}

/// Untyped identity of a [Token]
///
/// Two ids are equal if they come from the same token, the name is only used for display.
#[derive(Clone)]
pub struct TokenId {
    key: TokenKey,
    name: Arc<str>,
}
impl TokenId {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is the implicit token of a type
    pub fn is_implicit(&self) -> bool {
        matches!(self.key, TokenKey::Type(_))
    }
}
impl PartialEq for TokenId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for TokenId {}
impl Hash for TokenId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
impl Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            TokenKey::Type(_) => write!(f, "TokenId({})", self.name),
            TokenKey::Unique(id) => write!(f, "TokenId({}#{id})", self.name),
        }
    }
}
impl Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Validates and normalizes construction arguments of a token
pub type ArgsSchema<A> = Arc<dyn Fn(A) -> Result<A, String> + Send + Sync>;

/// Typed token resolving to a `T`, constructed with arguments `A`
pub struct Token<T, A = ()> {
    id: TokenId,
    schema: Option<ArgsSchema<A>>,
    _marker: PhantomData<fn(A) -> T>,
}
impl<T, A> Clone for Token<T, A> {
    fn clone(&self) -> Self {
        Token {
            id: self.id.clone(),
            schema: self.schema.clone(),
            _marker: PhantomData,
        }
    }
}
impl<T, A> Debug for Token<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.id)
            .field("schema", &self.schema.is_some())
            .finish()
    }
}

impl<T: Service> Token<T> {
    /// The implicit token of `T`, every call returns an equal token
    pub fn of() -> Self {
        Self::of_type()
    }

    /// Creates a new unique token
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::unique(name.into(), None)
    }

    /// Builds the request for resolving this token
    pub fn request(&self) -> ResolveRequest {
        ResolveRequest {
            name: InstanceName::of(&self.id),
            token: self.id.clone(),
            args: None,
        }
    }
}

impl<T: Service, A: InjectionArgs> Token<T, A> {
    /// The implicit token of `T`, taking arguments `A`
    pub fn of_type() -> Self {
        Token {
            id: TokenId {
                key: TokenKey::Type(TypeId::of::<T>()),
                name: short_type_name(std::any::type_name::<T>()).into(),
            },
            schema: None,
            _marker: PhantomData,
        }
    }

    /// Creates a new unique token taking arguments, without validation
    pub fn parameterized(name: impl Into<Arc<str>>) -> Self {
        Self::unique(name.into(), None)
    }

    /// Creates a new unique token whose arguments pass through `schema` before use
    pub fn with_schema(
        name: impl Into<Arc<str>>,
        schema: impl Fn(A) -> Result<A, String> + Send + Sync + 'static,
    ) -> Self {
        Self::unique(name.into(), Some(Arc::new(schema)))
    }

    fn unique(name: Arc<str>, schema: Option<ArgsSchema<A>>) -> Self {
        Token {
            id: TokenId {
                key: TokenKey::Unique(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed)),
                name,
            },
            schema,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &TokenId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// Validates `args` and builds the request for resolving this token with them
    pub fn request_with(&self, args: A) -> Result<ResolveRequest, DiError> {
        let args = match &self.schema {
            Some(schema) => schema(args).map_err(|reason| DiError::InvalidArguments {
                token: self.id.to_string(),
                reason,
            })?,
            None => args,
        };

        let serialized =
            serde_json::to_string(&args).map_err(|e| DiError::InvalidArguments {
                token: self.id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(ResolveRequest {
            name: InstanceName {
                token: self.id.clone(),
                args: Some(serialized.into()),
            },
            token: self.id.clone(),
            args: Some(Arc::new(args)),
        })
    }
}

/// Name of a single instance: token identity plus serialized arguments
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InstanceName {
    token: TokenId,
    args: Option<Arc<str>>,
}
impl InstanceName {
    pub fn of(token: &TokenId) -> Self {
        InstanceName {
            token: token.clone(),
            args: None,
        }
    }

    pub fn token(&self) -> &TokenId {
        &self.token
    }

    /// The serialized construction arguments
    pub fn args(&self) -> Option<&str> {
        self.args.as_deref()
    }
}
impl Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.args {
            Some(args) => write!(f, "{}({args})", self.token),
            None => write!(f, "{}", self.token),
        }
    }
}
impl Debug for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceName({self})")
    }
}

/// A validated, type erased request to resolve a token
#[derive(Clone)]
pub struct ResolveRequest {
    pub(crate) token: TokenId,
    pub(crate) name: InstanceName,
    pub(crate) args: Option<ErasedArgs>,
}
impl ResolveRequest {
    pub fn name(&self) -> &InstanceName {
        &self.name
    }

    pub fn token(&self) -> &TokenId {
        &self.token
    }
}
impl Debug for ResolveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResolveRequest").field(&self.name).finish()
    }
}

/// `my_crate::services::Database` -> `Database`, generic parameters are kept
fn short_type_name(full: &'static str) -> String {
    let (base, generics) = match full.find('<') {
        Some(pos) => full.split_at(pos),
        None => (full, ""),
    };
    let base = base.rsplit("::").next().unwrap_or(base);
    format!("{base}{generics}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde::Serialize;

    struct Database;

    #[derive(Serialize)]
    struct Page {
        size: u32,
    }

    #[rstest]
    fn implicit_tokens_are_equal() {
        let a = Token::<Database>::of();
        let b = Token::<Database>::of();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.name(), "Database");
        assert!(a.id().is_implicit());
    }

    #[rstest]
    fn explicit_tokens_are_unique_even_with_equal_names() {
        let a = Token::<Database>::new("db");
        let b = Token::<Database>::new("db");
        assert_ne!(a.id(), b.id());
        assert_ne!(a.request().name(), b.request().name());
    }

    #[rstest]
    fn equal_args_give_equal_names() {
        let token = Token::<Database, Page>::parameterized("paged");
        let first = token.request_with(Page { size: 10 }).unwrap();
        let second = token.request_with(Page { size: 10 }).unwrap();
        let other = token.request_with(Page { size: 20 }).unwrap();

        assert_eq!(first.name(), second.name());
        assert_ne!(first.name(), other.name());
        assert_eq!(first.name().to_string(), r#"paged({"size":10})"#);
    }

    #[rstest]
    fn schema_rejects_invalid_args() {
        let token = Token::<Database, Page>::with_schema("paged", |page: Page| {
            if page.size == 0 {
                Err("size must be positive".to_string())
            } else {
                Ok(page)
            }
        });

        let err = token.request_with(Page { size: 0 }).unwrap_err();
        assert!(matches!(err, DiError::InvalidArguments { ref reason, .. } if reason == "size must be positive"));
    }

    #[rstest]
    fn schema_can_normalize_args() {
        let token = Token::<Database, Page>::with_schema("paged", |page: Page| {
            Ok(Page {
                size: page.size.min(100),
            })
        });

        let clamped = token.request_with(Page { size: 500 }).unwrap();
        let max = token.request_with(Page { size: 100 }).unwrap();
        assert_eq!(clamped.name(), max.name());
    }

    #[rstest]
    #[case("Database", "Database")]
    #[case("app::db::Database", "Database")]
    #[case("app::Wrapper<app::db::Database>", "Wrapper<app::db::Database>")]
    fn shortens_type_names(#[case] full: &'static str, #[case] short: &str) {
        assert_eq!(short_type_name(full), short);
    }
}
