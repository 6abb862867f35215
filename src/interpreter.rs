//! Tree‑walking evaluator.
//!
//! `evaluate` and `execute` are mutually recursive and dispatch by `match`
//! over the closed [`Expr`] / [`Stmt`] sets. Variable references found by
//! the resolver are looked up at a fixed distance in the frame chain; all
//! others go to the global frame. `return` travels back to the call boundary
//! as [`ControlFlow::Return`] rather than as an error.

use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use log::{debug, info};

use crate::ast::{Expr, ExprId, FunctionDecl, LiteralValue, Program, Stmt};
use crate::callable::{self, Callable, LoxFunction, INITIALIZER, SUPER, THIS};
use crate::class::LoxClass;
use crate::environment::{EnvRef, Environment};
use crate::resolver::Bindings;
use crate::error::{LoxError, Result};
use crate::stack::ensure_sufficient_stack;
use crate::token::{Token, TokenType};
use crate::value::Value;

/// Deepest chain of active calls before a program is stopped with
/// `Stack overflow.`.
pub const MAX_CALL_DEPTH: usize = 1024;

/// Outcome of executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    /// Continue with the next statement.
    Proceed,

    /// A `return` is unwinding to the nearest call boundary.
    Return(Value),
}

pub struct Interpreter {
    globals: EnvRef,
    environment: EnvRef,
    /// Binding table: resolved scope distance per variable‑reference node.
    locals: Bindings,
    out: Box<dyn Write>,
    call_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Interpreter printing to standard output.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Interpreter printing to `out`. Defines the native `clock`.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        info!("Initializing Interpreter");

        let globals = Environment::new().into_ref();

        debug!("Defining native function 'clock'");

        globals
            .borrow_mut()
            .define("clock", Value::NativeFunction(Rc::new(callable::clock())));

        Self {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
            out,
            call_depth: 0,
        }
    }

    /// Adopt the distances of a successfully resolved program.
    pub fn add_bindings(&mut self, bindings: Bindings) {
        debug!("Adding {} binding(s)", bindings.len());

        self.locals.extend(bindings);
    }

    /// Run an interactive line. A trailing bare expression comes back
    /// formatted for display.
    pub fn interpret(&mut self, program: &Program) -> Result<Option<String>> {
        self.interpret_statements(&program.statements)?;

        match &program.trailing {
            Some(expr) => {
                let value = self.evaluate(expr)?;
                info!("Expression evaluated to: {}", value);
                Ok(Some(value.to_string()))
            }

            None => Ok(None),
        }
    }

    /// Execute statements in the current (global) frame.
    pub fn interpret_statements(&mut self, statements: &[Stmt]) -> Result<()> {
        debug!("Interpreting {} statements", statements.len());

        for stmt in statements {
            if let ControlFlow::Return(_) = self.execute(stmt)? {
                break;
            }
        }

        info!("Interpretation completed successfully");

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────────

    pub fn execute(&mut self, stmt: &Stmt) -> Result<ControlFlow> {
        ensure_sufficient_stack(|| self.execute_stmt(stmt))
    }

    fn execute_stmt(&mut self, stmt: &Stmt) -> Result<ControlFlow> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                writeln!(self.out, "{}", value)?;
                debug!("Printed value: {}", value);
            }

            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                self.environment.borrow_mut().define(&name.lexeme, value);
            }

            Stmt::Block(statements) => {
                let environment = Environment::with_enclosing(Rc::clone(&self.environment));
                return self.execute_block(statements, environment);
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    return self.execute(then_branch);
                } else if let Some(else_stmt) = else_branch {
                    return self.execute(else_stmt);
                }
            }

            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    if let flow @ ControlFlow::Return(_) = self.execute(body)? {
                        return Ok(flow);
                    }
                }
            }

            Stmt::Function(decl) => {
                let function = self.make_function(decl);
                if let Some(name) = &decl.name {
                    debug!("Defining function '{}'", name.lexeme);
                    self.environment.borrow_mut().define(&name.lexeme, function);
                }
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                debug!("Returning value: {}", value);
                return Ok(ControlFlow::Return(value));
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.declare_class(name, superclass.as_ref(), methods)?,
        }

        Ok(ControlFlow::Proceed)
    }

    /// Run `statements` in `environment`, restoring the previous frame on
    /// every exit path.
    pub fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: Environment,
    ) -> Result<ControlFlow> {
        let previous = std::mem::replace(&mut self.environment, environment.into_ref());

        let mut result = Ok(ControlFlow::Proceed);
        for stmt in statements {
            match self.execute(stmt) {
                Ok(ControlFlow::Proceed) => continue,
                other => {
                    result = other;
                    break;
                }
            }
        }

        self.environment = previous;

        result
    }

    /// A function declaration or expression closes over the current frame.
    fn make_function(&self, decl: &Rc<FunctionDecl>) -> Value {
        Value::Function(Rc::new(LoxFunction::new(
            Rc::clone(decl),
            Rc::clone(&self.environment),
            false,
        )))
    }

    fn declare_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<()> {
        debug!("Declaring class '{}'", name.lexeme);

        let superclass = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Class(class) => Some(class),
                _ => {
                    let at = match expr {
                        Expr::Variable {
                            name: super_name, ..
                        } => super_name,
                        _ => name,
                    };
                    return Err(LoxError::runtime(at, "Superclass must be a class."));
                }
            },
            None => None,
        };

        self.environment
            .borrow_mut()
            .define(&name.lexeme, Value::Nil);

        // Methods of a subclass close over a frame holding `super`.
        let method_env = match &superclass {
            Some(class) => {
                let mut env = Environment::with_enclosing(Rc::clone(&self.environment));
                env.define(SUPER, Value::Class(Rc::clone(class)));
                env.into_ref()
            }
            None => Rc::clone(&self.environment),
        };

        let table: HashMap<String, Rc<LoxFunction>> = methods
            .iter()
            .filter_map(|decl| {
                let method_name = decl.name.as_ref()?.lexeme.clone();
                let function = LoxFunction::new(
                    Rc::clone(decl),
                    Rc::clone(&method_env),
                    method_name == INITIALIZER,
                );
                Some((method_name, Rc::new(function)))
            })
            .collect();

        let class = LoxClass::new(name.lexeme.clone(), superclass, table);

        info!("Class '{}' declared", name.lexeme);

        self.environment
            .borrow_mut()
            .assign(name, Value::Class(Rc::new(class)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────────

    /// Evaluates an expression and returns a Value.
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        ensure_sufficient_stack(|| self.evaluate_expr(expr))
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Str(s) => Value::String(s.clone()),
                LiteralValue::True => Value::Bool(true),
                LiteralValue::False => Value::Bool(false),
                LiteralValue::Nil => Value::Nil,
            }),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { operator, right } => {
                let right = self.evaluate(right)?;

                match operator.token_type {
                    TokenType::MINUS => match right {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(LoxError::runtime(operator, "Operand must be a number.")),
                    },
                    TokenType::BANG => Ok(Value::Bool(!right.is_truthy())),
                    _ => Err(LoxError::runtime(operator, "Invalid unary operator.")),
                }
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;

                binary(operator, left, right)
            }

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;

                let short_circuit = if operator.token_type == TokenType::OR {
                    left.is_truthy()
                } else {
                    !left.is_truthy()
                };

                if short_circuit {
                    Ok(left)
                } else {
                    self.evaluate(right)
                }
            }

            Expr::Variable { id, name } => self.look_up_variable(*id, name),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;

                match self.locals.get(id) {
                    Some(&distance) => {
                        if !Environment::assign_at(
                            &self.environment,
                            distance,
                            &name.lexeme,
                            value.clone(),
                        ) {
                            return Err(LoxError::runtime(
                                name,
                                format!("Undefined variable '{}'.", name.lexeme),
                            ));
                        }
                    }
                    None => self.globals.borrow_mut().assign(name, value.clone())?,
                }

                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;

                let mut values = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    values.push(self.evaluate(arg)?);
                }

                self.call_value(&callee, paren, values)
            }

            Expr::Get { object, name } => match self.evaluate(object)? {
                Value::Instance(instance) => instance.get(name),
                _ => Err(LoxError::runtime(name, "Only instances have properties.")),
            },

            Expr::Set {
                object,
                name,
                value,
            } => {
                let Value::Instance(instance) = self.evaluate(object)? else {
                    return Err(LoxError::runtime(name, "Only instances have fields."));
                };

                let value = self.evaluate(value)?;
                instance.set(name, value.clone());

                Ok(value)
            }

            Expr::This { id, keyword } => self.look_up_variable(*id, keyword),

            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),

            Expr::Function(decl) => Ok(self.make_function(decl)),
        }
    }

    /// Resolved references read at their distance; the rest are globals.
    fn look_up_variable(&self, id: ExprId, name: &Token) -> Result<Value> {
        match self.locals.get(&id) {
            Some(&distance) => Environment::get_at(&self.environment, distance, &name.lexeme)
                .ok_or_else(|| {
                    LoxError::runtime(name, format!("Undefined variable '{}'.", name.lexeme))
                }),
            None => self.globals.borrow().get(name),
        }
    }

    /// `super.method`: start the lookup at the superclass, bind to `this`,
    /// which lives one frame inside the `super` frame.
    fn evaluate_super(&self, id: ExprId, keyword: &Token, method: &Token) -> Result<Value> {
        let distance = self.locals.get(&id).copied().ok_or_else(|| {
            LoxError::runtime(keyword, "Can't use 'super' outside of a class.")
        })?;

        let superclass = match Environment::get_at(&self.environment, distance, SUPER) {
            Some(Value::Class(class)) => class,
            _ => return Err(LoxError::runtime(keyword, "Superclass must be a class.")),
        };

        let receiver = match distance
            .checked_sub(1)
            .and_then(|d| Environment::get_at(&self.environment, d, THIS))
        {
            Some(Value::Instance(instance)) => instance,
            _ => return Err(LoxError::runtime(keyword, "Can't use 'this' outside of a class.")),
        };

        match superclass.find_method(&method.lexeme) {
            Some(found) => Ok(Value::Function(Rc::new(found.bind(receiver)))),
            None => Err(LoxError::runtime(
                method,
                format!("Undefined property '{}'.", method.lexeme),
            )),
        }
    }

    /// Invoke a callable value after checking arity and call depth.
    fn call_value(&mut self, callee: &Value, paren: &Token, arguments: Vec<Value>) -> Result<Value> {
        let function: &dyn Callable = match callee {
            Value::Function(f) => &**f,
            Value::NativeFunction(f) => &**f,
            Value::Class(class) => class,
            _ => {
                return Err(LoxError::runtime(
                    paren,
                    "Can only call functions and classes.",
                ))
            }
        };

        if arguments.len() != function.arity() {
            return Err(LoxError::runtime(
                paren,
                format!(
                    "Expected {} arguments but got {}.",
                    function.arity(),
                    arguments.len()
                ),
            ));
        }

        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(LoxError::runtime(paren, "Stack overflow."));
        }

        debug!("Calling {} with {} argument(s)", callee, arguments.len());

        self.call_depth += 1;
        let result = function.call(self, arguments);
        self.call_depth -= 1;

        result
    }
}

/// Arithmetic, comparison and equality on already‑evaluated operands.
fn binary(operator: &Token, left: Value, right: Value) -> Result<Value> {
    use Value::{Bool, Number};

    match (&operator.token_type, left, right) {
        (TokenType::EQUAL_EQUAL, l, r) => Ok(Bool(l == r)),
        (TokenType::BANG_EQUAL, l, r) => Ok(Bool(l != r)),

        (TokenType::PLUS, Number(a), Number(b)) => Ok(Number(a + b)),
        (TokenType::PLUS, l @ (Number(_) | Value::String(_)), r @ (Number(_) | Value::String(_))) => {
            Ok(Value::String(format!("{}{}", l, r)))
        }
        (TokenType::PLUS, _, _) => Err(LoxError::runtime(
            operator,
            "Operands must be two numbers or two strings.",
        )),

        (TokenType::SLASH, Number(_), Number(b)) if b == 0.0 => {
            Err(LoxError::runtime(operator, "Division by zero."))
        }

        (tt, Number(a), Number(b)) => match tt {
            TokenType::MINUS => Ok(Number(a - b)),
            TokenType::STAR => Ok(Number(a * b)),
            TokenType::SLASH => Ok(Number(a / b)),
            TokenType::GREATER => Ok(Bool(a > b)),
            TokenType::GREATER_EQUAL => Ok(Bool(a >= b)),
            TokenType::LESS => Ok(Bool(a < b)),
            TokenType::LESS_EQUAL => Ok(Bool(a <= b)),
            _ => Err(LoxError::runtime(operator, "Invalid binary operator.")),
        },

        _ => Err(LoxError::runtime(operator, "Operands must be numbers.")),
    }
}
