use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::error::{LoxError, Result};
use crate::token::Token;
use crate::value::Value;

/// Shared handle to a frame. Closures keep frames alive past the block that
/// created them, hence reference counting.
pub type EnvRef = Rc<RefCell<Environment>>;

/// One scope frame: a name→value table plus the enclosing frame.
#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<EnvRef>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: EnvRef) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Wrap a frame into a shareable handle.
    pub fn into_ref(self) -> EnvRef {
        Rc::new(RefCell::new(self))
    }

    /// Insert or overwrite `name` in this frame.
    pub fn define(&mut self, name: &str, value: Value) {
        debug!("Defining '{}' as {}", name, value.type_name());

        self.values.insert(name.to_string(), value);
    }

    /// Look `name` up along the whole chain.
    pub fn get(&self, name: &Token) -> Result<Value> {
        if let Some(value) = self.values.get(&name.lexeme) {
            Ok(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name)
        } else {
            Err(LoxError::runtime(
                name,
                format!("Undefined variable '{}'.", name.lexeme),
            ))
        }
    }

    /// Overwrite the nearest existing binding of `name`.
    pub fn assign(&mut self, name: &Token, value: Value) -> Result<()> {
        if let Some(slot) = self.values.get_mut(&name.lexeme) {
            *slot = value;
            Ok(())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value)
        } else {
            Err(LoxError::runtime(
                name,
                format!("Undefined variable '{}'.", name.lexeme),
            ))
        }
    }

    /// The frame `distance` hops outward from `env` (0 is `env` itself).
    pub fn ancestor(env: &EnvRef, distance: usize) -> Option<EnvRef> {
        let mut current = Rc::clone(env);

        for _ in 0..distance {
            let next = current.borrow().enclosing.clone()?;
            current = next;
        }

        Some(current)
    }

    /// Read `name` from exactly the frame at `distance`, without walking
    /// further.
    pub fn get_at(env: &EnvRef, distance: usize, name: &str) -> Option<Value> {
        let frame = Self::ancestor(env, distance)?;
        let value = frame.borrow().values.get(name).cloned();
        value
    }

    /// Write `name` into exactly the frame at `distance`. Returns `false` if
    /// the chain is shorter than `distance`.
    pub fn assign_at(env: &EnvRef, distance: usize, name: &str, value: Value) -> bool {
        match Self::ancestor(env, distance) {
            Some(frame) => {
                frame.borrow_mut().values.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;

    fn ident(name: &str) -> Token {
        Token::new(TokenType::IDENTIFIER, name, 1)
    }

    #[test]
    fn get_walks_outward() {
        let globals = Environment::new().into_ref();
        globals.borrow_mut().define("a", Value::Number(1.0));

        let inner = Environment::with_enclosing(Rc::clone(&globals));

        assert_eq!(inner.get(&ident("a")).unwrap(), Value::Number(1.0));
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let env = Environment::new();
        let err = env.get(&ident("missing")).unwrap_err();

        assert_eq!(err.message(), "Undefined variable 'missing'.");
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn assign_updates_the_defining_frame() {
        let globals = Environment::new().into_ref();
        globals.borrow_mut().define("a", Value::Number(1.0));

        let mut inner = Environment::with_enclosing(Rc::clone(&globals));
        inner.assign(&ident("a"), Value::Number(2.0)).unwrap();

        assert_eq!(
            globals.borrow().get(&ident("a")).unwrap(),
            Value::Number(2.0)
        );
    }

    #[test]
    fn get_at_skips_shadowing_frames() {
        let outer = Environment::new().into_ref();
        outer.borrow_mut().define("x", Value::String("outer".into()));

        let inner = Environment::with_enclosing(Rc::clone(&outer)).into_ref();
        inner.borrow_mut().define("x", Value::String("inner".into()));

        assert_eq!(
            Environment::get_at(&inner, 1, "x"),
            Some(Value::String("outer".into()))
        );
        assert_eq!(
            Environment::get_at(&inner, 0, "x"),
            Some(Value::String("inner".into()))
        );
        assert!(Environment::get_at(&inner, 2, "x").is_none());

        assert!(Environment::assign_at(&inner, 1, "x", Value::Nil));
        assert_eq!(Environment::get_at(&outer, 0, "x"), Some(Value::Nil));
    }
}
