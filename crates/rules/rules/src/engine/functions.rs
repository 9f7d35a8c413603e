use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ruleweave_facts::{Fact, FactId, FactSource, FactStore, Value};
use tracing::{debug, warn};

use crate::engine::builtins::call_builtin;
use crate::error::FunctionError;

/// A callable that rules can invoke by name, either from a `call` action or
/// inside an expression.
///
/// Implemented for any `Fn(&[Value], &mut FunctionContext) -> Result<Value,
/// FunctionError>` closure that is `Send + Sync`.
pub trait RuleFunction: Send + Sync {
    /// Invoke the function with evaluated arguments.
    fn call(&self, args: &[Value], ctx: &mut FunctionContext<'_>) -> Result<Value, FunctionError>;
}

impl<F> RuleFunction for F
where
    F: Fn(&[Value], &mut FunctionContext<'_>) -> Result<Value, FunctionError> + Send + Sync,
{
    fn call(&self, args: &[Value], ctx: &mut FunctionContext<'_>) -> Result<Value, FunctionError> {
        self(args, ctx)
    }
}

enum Access<'a> {
    Read(&'a dyn FactSource),
    Write(&'a mut FactStore),
}

/// The fact store handle passed to functions.
///
/// Functions always get read access. Write access is only granted to
/// functions invoked by a `call` action while an activation fires; during
/// matching and proof search writes fail with [`FunctionError::ReadOnly`].
pub struct FunctionContext<'a> {
    access: Access<'a>,
}

impl<'a> FunctionContext<'a> {
    /// A read-only context.
    pub fn read_only(facts: &'a dyn FactSource) -> Self {
        Self {
            access: Access::Read(facts),
        }
    }

    /// A context that may mutate `store`.
    pub fn writable(store: &'a mut FactStore) -> Self {
        Self {
            access: Access::Write(store),
        }
    }

    /// Returns `true` if writes are permitted.
    pub fn is_writable(&self) -> bool {
        matches!(self.access, Access::Write(_))
    }

    fn source(&self) -> &dyn FactSource {
        match &self.access {
            Access::Read(facts) => *facts,
            Access::Write(store) => &**store,
        }
    }

    /// Look up a fact.
    pub fn get(&self, id: &FactId) -> Option<&Fact> {
        self.source().get(id)
    }

    /// Facts of a type (or all facts), in id order.
    pub fn facts(&self, fact_type: Option<&str>) -> Vec<&Fact> {
        self.source().candidates(fact_type).collect()
    }

    fn store(&mut self) -> Result<&mut FactStore, FunctionError> {
        match &mut self.access {
            Access::Write(store) => Ok(&mut **store),
            Access::Read(_) => Err(FunctionError::ReadOnly),
        }
    }

    /// Assert a fact.
    pub fn assert(&mut self, fact: Fact) -> Result<FactId, FunctionError> {
        Ok(self.store()?.assert(fact))
    }

    /// Retract a fact, returning whether it existed.
    pub fn retract(&mut self, id: &FactId) -> Result<bool, FunctionError> {
        Ok(self.store()?.retract(id))
    }

    /// Update one attribute of a fact.
    pub fn modify(
        &mut self,
        id: &FactId,
        attribute: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), FunctionError> {
        Ok(self.store()?.modify(id, attribute, value)?)
    }
}

/// Name-keyed table of user functions.
///
/// Registering a name that already exists replaces the earlier function.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Arc<dyn RuleFunction>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure under `name`. Last registration wins.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value], &mut FunctionContext<'_>) -> Result<Value, FunctionError>
            + Send
            + Sync
            + 'static,
    {
        self.register_function(name, Arc::new(function));
    }

    /// Register a shared [`RuleFunction`] under `name`. Last registration wins.
    pub fn register_function(&mut self, name: impl Into<String>, function: Arc<dyn RuleFunction>) {
        let name = name.into();
        if self.functions.insert(name.clone(), function).is_some() {
            warn!(function = %name, "function re-registered, replacing previous definition");
        } else {
            debug!(function = %name, "function registered");
        }
    }

    /// Remove a function. Returns `false` if it was not registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    /// Returns `true` if a function is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Invoke a registered function.
    pub fn call(
        &self,
        name: &str,
        args: &[Value],
        ctx: &mut FunctionContext<'_>,
    ) -> Result<Value, FunctionError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| FunctionError::NotFound(name.to_owned()))?;
        function.call(args, ctx)
    }

    /// Invoke a registered function, falling back to the builtins.
    pub fn call_or_builtin(
        &self,
        name: &str,
        args: &[Value],
        ctx: &mut FunctionContext<'_>,
    ) -> Result<Value, FunctionError> {
        match self.functions.get(name) {
            Some(function) => function.call(args, ctx),
            None => call_builtin(name, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: i64) -> impl Fn(&[Value], &mut FunctionContext<'_>) -> Result<Value, FunctionError>
    + Send
    + Sync
    + 'static {
        move |_: &[Value], _: &mut FunctionContext<'_>| Ok(Value::Int(value))
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = FunctionRegistry::new();
        registry.register("answer", constant(1));
        registry.register("answer", constant(42));

        let store = FactStore::new();
        let mut ctx = FunctionContext::read_only(&store);
        assert_eq!(registry.call("answer", &[], &mut ctx).unwrap(), Value::Int(42));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["answer"]);
    }

    #[test]
    fn unregister_removes_function() {
        let mut registry = FunctionRegistry::new();
        registry.register("f", constant(1));
        assert!(registry.unregister("f"));
        assert!(!registry.unregister("f"));

        let store = FactStore::new();
        let mut ctx = FunctionContext::read_only(&store);
        assert_eq!(
            registry.call("f", &[], &mut ctx).unwrap_err(),
            FunctionError::NotFound("f".into())
        );
    }

    #[test]
    fn registered_function_shadows_builtin() {
        let mut registry = FunctionRegistry::new();
        let store = FactStore::new();
        let mut ctx = FunctionContext::read_only(&store);
        assert_eq!(
            registry
                .call_or_builtin("abs", &[Value::Int(-3)], &mut ctx)
                .unwrap(),
            Value::Int(3)
        );

        registry.register("abs", constant(0));
        assert_eq!(
            registry
                .call_or_builtin("abs", &[Value::Int(-3)], &mut ctx)
                .unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn read_only_context_rejects_writes() {
        let store = FactStore::new();
        let mut ctx = FunctionContext::read_only(&store);
        assert!(!ctx.is_writable());
        assert_eq!(
            ctx.assert(Fact::new("Audit")).unwrap_err(),
            FunctionError::ReadOnly
        );
    }

    #[test]
    fn writable_context_mutates_store() {
        let mut registry = FunctionRegistry::new();
        registry.register("audit", |args: &[Value], ctx: &mut FunctionContext<'_>| {
            let fact = Fact::new("Audit").with("message", args[0].clone());
            ctx.assert(fact)?;
            Ok(Value::Null)
        });

        let mut store = FactStore::new();
        {
            let mut ctx = FunctionContext::writable(&mut store);
            registry
                .call("audit", &["fired".into()], &mut ctx)
                .unwrap();
            assert_eq!(ctx.facts(Some("Audit")).len(), 1);
        }
        assert_eq!(store.len(), 1);
    }
}
