//! The callable capability and the two function kinds that implement it.
//! Classes are callable too; see [`crate::class`].

use std::fmt;
use std::rc::Rc;

use chrono::Utc;
use log::{debug, info};

use crate::ast::FunctionDecl;
use crate::class::LoxInstance;
use crate::environment::{EnvRef, Environment};
use crate::error::Result;
use crate::interpreter::{ControlFlow, Interpreter};
use crate::value::Value;

/// Name under which methods see their receiver.
pub const THIS: &str = "this";

/// Name of the hidden binding that holds a subclass's superclass.
pub const SUPER: &str = "super";

/// Name of the method run on construction.
pub const INITIALIZER: &str = "init";

/// Anything that can appear before `( … )` at runtime.
pub trait Callable {
    /// Exact number of arguments the callee accepts.
    fn arity(&self) -> usize;

    /// Run the callee. Arity has already been checked by the caller.
    fn call(&self, interpreter: &mut Interpreter, arguments: Vec<Value>) -> Result<Value>;
}

/// A user function or method together with the frame it closes over.
pub struct LoxFunction {
    declaration: Rc<FunctionDecl>,
    closure: EnvRef,
    is_initializer: bool,
}

impl LoxFunction {
    pub fn new(declaration: Rc<FunctionDecl>, closure: EnvRef, is_initializer: bool) -> Self {
        Self {
            declaration,
            closure,
            is_initializer,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.declaration.name.as_ref().map(|t| t.lexeme.as_str())
    }

    /// Produce a copy of this method whose closure has `this` bound to
    /// `instance`.
    pub fn bind(&self, instance: Rc<LoxInstance>) -> LoxFunction {
        debug!(
            "Binding method '{}' to an instance of {}",
            self.name().unwrap_or("<anonymous>"),
            instance.class().name
        );

        let mut environment = Environment::with_enclosing(Rc::clone(&self.closure));
        environment.define(THIS, Value::Instance(instance));

        LoxFunction {
            declaration: Rc::clone(&self.declaration),
            closure: environment.into_ref(),
            is_initializer: self.is_initializer,
        }
    }

    /// The receiver of a bound initializer.
    fn receiver(&self) -> Value {
        Environment::get_at(&self.closure, 0, THIS).unwrap_or(Value::Nil)
    }
}

impl Callable for LoxFunction {
    fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    fn call(&self, interpreter: &mut Interpreter, arguments: Vec<Value>) -> Result<Value> {
        let mut environment = Environment::with_enclosing(Rc::clone(&self.closure));

        for (param, argument) in self.declaration.params.iter().zip(arguments) {
            environment.define(&param.lexeme, argument);
        }

        let flow = interpreter.execute_block(&self.declaration.body, environment)?;

        if self.is_initializer {
            return Ok(self.receiver());
        }

        match flow {
            ControlFlow::Return(value) => Ok(value),
            ControlFlow::Proceed => Ok(Value::Nil),
        }
    }
}

impl fmt::Display for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "<fn {}>", name),
            None => write!(f, "<fn>"),
        }
    }
}

// Closures can reach themselves through their environment, so only print
// the name.
impl fmt::Debug for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// A function implemented in Rust.
#[derive(Debug)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&[Value]) -> Value,
}

impl Callable for NativeFunction {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(&self, _interpreter: &mut Interpreter, arguments: Vec<Value>) -> Result<Value> {
        debug!("Calling native function '{}'", self.name);

        let result = (self.func)(&arguments);

        info!("Native function '{}' returned: {}", self.name, result);

        Ok(result)
    }
}

/// `clock()`: seconds since the Unix epoch, with millisecond precision.
pub fn clock() -> NativeFunction {
    NativeFunction {
        name: "clock",
        arity: 0,
        func: |_args: &[Value]| Value::Number(Utc::now().timestamp_millis() as f64 / 1000.0),
    }
}
