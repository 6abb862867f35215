#[cfg(test)]
mod interpreter_tests {
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    use rox::lox::{Lox, RunOutcome};

    /// `Write` sink that tests can read back after the interpreter is done.
    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn take(&self) -> String {
            let bytes = std::mem::take(&mut *self.0.borrow_mut());
            String::from_utf8(bytes).expect("output is UTF-8")
        }
    }

    fn session() -> (Lox, Capture) {
        let capture = Capture::default();
        (Lox::with_output(Box::new(capture.clone())), capture)
    }

    /// Run a program that must succeed and return what it printed.
    fn run(source: &str) -> String {
        let (mut lox, out) = session();
        let outcome = lox.run(source);

        assert!(outcome.is_ok(), "diagnostics: {:?}", outcome.diagnostics);
        out.take()
    }

    /// Run a program that must fail at runtime; return output and the error.
    fn run_failing(source: &str) -> (String, String) {
        let (mut lox, out) = session();
        let outcome: RunOutcome = lox.run(source);

        assert!(!outcome.had_static_error, "{:?}", outcome.diagnostics);
        assert!(outcome.had_runtime_error);
        assert_eq!(outcome.diagnostics.len(), 1);

        (out.take(), outcome.diagnostics[0].to_string())
    }

    /// Run `f` on a thread with a main-thread-sized stack.
    fn with_main_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(8 * 1024 * 1024)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run("print (5 + 10 * 2 + 15 / 3) * 2 + -10;"), "50\n");
        assert_eq!(run("print (5 - (3 - 1)) * 10 + -2 * -10 / 2 * 0 + 20;"), "50\n");
        assert_eq!(run("print 2 + 3 * 4;"), "14\n");
        assert_eq!(run("print 7 / 2;"), "3.5\n");
    }

    #[test]
    fn equality_binds_looser_than_arithmetic() {
        assert_eq!(run("print (10 + 2) * 30 == 300 + 20 * 3;"), "true\n");
        assert_eq!(run("print (10 + 2) * 30 != 300 + 20 * 3;"), "false\n");
    }

    #[test]
    fn equality_and_comparison() {
        assert_eq!(
            run("print 1 == 1; print 1 == \"1\"; print nil == nil; print nil == false; print 3 >= 4;"),
            "true\nfalse\ntrue\nfalse\nfalse\n"
        );
    }

    #[test]
    fn mixed_concatenation() {
        assert_eq!(run("print 1 + \"1\";"), "11\n");
        assert_eq!(run("print \"a\" + 2.5;"), "a2.5\n");
        assert_eq!(run("print \"foo\" + \"bar\";"), "foobar\n");
        assert_eq!(run("print 1 + 0;"), "1\n");
    }

    #[test]
    fn truthiness() {
        assert_eq!(
            run("if (0) print \"zero\"; if (\"\") print \"empty\"; if (nil) print \"nil\"; else print \"falsy\";"),
            "zero\nempty\nfalsy\n"
        );
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(
            run("print nil or \"yes\"; print 1 and 2; print false and boom; print 1 or boom;"),
            "yes\n2\nfalse\n1\n"
        );
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let (out, err) = run_failing("print 1;\nprint 10 / 0;\nprint 2;");

        assert_eq!(out, "1\n");
        assert_eq!(err, "Division by zero.\n[line 2]");
    }

    #[test]
    fn type_errors() {
        assert_eq!(run_failing("print -\"a\";").1, "Operand must be a number.\n[line 1]");
        assert_eq!(run_failing("print 1 < \"a\";").1, "Operands must be numbers.\n[line 1]");
        assert_eq!(
            run_failing("print true + nil;").1,
            "Operands must be two numbers or two strings.\n[line 1]"
        );
        assert_eq!(
            run_failing("\"text\"();").1,
            "Can only call functions and classes.\n[line 1]"
        );
    }

    #[test]
    fn undefined_variable() {
        assert_eq!(run_failing("print nope;").1, "Undefined variable 'nope'.\n[line 1]");
        assert_eq!(run_failing("nope = 1;").1, "Undefined variable 'nope'.\n[line 1]");
    }

    #[test]
    fn variables_blocks_and_shadowing() {
        let source = r#"
            var a = 1;
            a = a + 4;
            print a;
            var b = "outer";
            {
                var b = "inner";
                print b;
            }
            print b;
            var c;
            print c;
        "#;

        assert_eq!(run(source), "5\ninner\nouter\nnil\n");
    }

    #[test]
    fn loops() {
        assert_eq!(run("for (var i = 0; i < 3; i = i + 1) print i;"), "0\n1\n2\n");
        assert_eq!(run("var n = 3; while (n > 0) { print n; n = n - 1; }"), "3\n2\n1\n");
    }

    #[test]
    fn closures_keep_their_own_counter() {
        let source = r#"
            fun makeCounter() {
                var i = 0;
                fun count() {
                    i = i + 1;
                    print i;
                }
                return count;
            }
            var counter = makeCounter();
            counter();
            counter();
            var other = makeCounter();
            other();
        "#;

        assert_eq!(run(source), "1\n2\n1\n");
    }

    #[test]
    fn closures_bind_statically() {
        let source = r#"
            var a = "global";
            {
                fun showA() { print a; }
                showA();
                var a = "block";
                showA();
            }
        "#;

        assert_eq!(run(source), "global\nglobal\n");
    }

    #[test]
    fn recursion_and_return() {
        let source = r#"
            fun fib(n) {
                if (n < 2) return n;
                return fib(n - 1) + fib(n - 2);
            }
            print fib(15);
            fun nothing() {}
            print nothing();
        "#;

        assert_eq!(run(source), "610\nnil\n");
    }

    #[test]
    fn function_values_print() {
        assert_eq!(
            run("fun f() {} print f; print clock; print fun () {};"),
            "<fn f>\n<native fn>\n<fn>\n"
        );
    }

    #[test]
    fn function_expressions_are_first_class() {
        let source = r#"
            fun apply(f, x) { return f(x); }
            print apply(fun (n) { return n * 2; }, 21);
        "#;

        assert_eq!(run(source), "42\n");
    }

    #[test]
    fn wrong_arity() {
        assert_eq!(
            run_failing("fun f(a, b) {} f(1);").1,
            "Expected 2 arguments but got 1.\n[line 1]"
        );
    }

    #[test]
    fn unbounded_recursion_overflows_cleanly() {
        let (_, err) = run_failing("fun f() { f(); } f();");

        assert_eq!(err, "Stack overflow.\n[line 1]");
    }

    #[test]
    fn clock_returns_seconds() {
        assert_eq!(run("var t = clock(); print t > 1000000000;"), "true\n");
    }

    #[test]
    fn fields_and_methods() {
        let source = r#"
            class Cake {
                taste() {
                    var adjective = "delicious";
                    print "The " + this.flavor + " cake is " + adjective + "!";
                }
            }
            var cake = Cake();
            cake.flavor = "German chocolate";
            cake.taste();
            print Cake;
            print cake;
        "#;

        assert_eq!(
            run(source),
            "The German chocolate cake is delicious!\nCake\nCake instance\n"
        );
    }

    #[test]
    fn initializer_runs_once_and_yields_instance() {
        let source = r#"
            class Point {
                init(x, y) {
                    print "init";
                    this.x = x;
                    this.y = y;
                }
            }
            var p = Point(1, 2);
            print p.x + p.y;
            print p;
            print p.init(3, 4);
            print p.x;
        "#;

        assert_eq!(run(source), "init\n3\nPoint instance\ninit\nPoint instance\n3\n");
    }

    #[test]
    fn early_return_in_initializer_still_yields_instance() {
        assert_eq!(
            run("class A { init() { return; } } print A();"),
            "A instance\n"
        );
    }

    #[test]
    fn bound_methods_remember_their_receiver() {
        let source = r#"
            class Person {
                init(name) { this.name = name; }
                greet() { print "hi " + this.name; }
            }
            var greet = Person("ann").greet;
            greet();
        "#;

        assert_eq!(run(source), "hi ann\n");
    }

    #[test]
    fn inheritance_and_super() {
        let source = r#"
            class Doughnut {
                cook() { print "Fry until golden brown."; }
                name() { return "doughnut"; }
            }
            class BostonCream < Doughnut {
                cook() {
                    super.cook();
                    print "Pipe full of custard and coat with chocolate.";
                }
            }
            var d = BostonCream();
            d.cook();
            print d.name();
        "#;

        assert_eq!(
            run(source),
            "Fry until golden brown.\nPipe full of custard and coat with chocolate.\ndoughnut\n"
        );
    }

    #[test]
    fn property_errors() {
        assert_eq!(
            run_failing("class A {} print A().missing;").1,
            "Undefined property 'missing'.\n[line 1]"
        );
        assert_eq!(
            run_failing("var x = 1; print x.y;").1,
            "Only instances have properties.\n[line 1]"
        );
        assert_eq!(
            run_failing("var x = 1; x.y = 2;").1,
            "Only instances have fields.\n[line 1]"
        );
    }

    #[test]
    fn superclass_must_be_a_class() {
        assert_eq!(
            run_failing("var NotAClass = 1; class B < NotAClass {}").1,
            "Superclass must be a class.\n[line 1]"
        );
    }

    #[test]
    fn static_errors_prevent_execution() {
        let (mut lox, out) = session();
        let outcome = lox.run("print 1;\nprint ;");

        assert!(outcome.had_static_error);
        assert!(!outcome.had_runtime_error);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(out.take(), "");

        let outcome = lox.run("print \"before\"; { var a = a; }");
        assert!(outcome.had_static_error);
        assert_eq!(out.take(), "");
    }

    #[test]
    fn lexical_and_syntax_errors_are_both_reported() {
        let (mut lox, _) = session();
        let outcome = lox.run("var a = @;");

        let rendered: Vec<String> = outcome.diagnostics.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "[line 1] Error: Unexpected character: @",
                "[line 1] Error at ';': Expect expression.",
            ]
        );
    }

    #[test]
    fn runtime_errors_restore_the_global_frame() {
        let (mut lox, out) = session();

        let outcome = lox.run("{ var a = \"inner\"; print 1 / 0; }");
        assert!(outcome.had_runtime_error);

        let outcome = lox.run("fun f() { var b = 1; nope; } f();");
        assert_eq!(
            outcome.diagnostics[0].to_string(),
            "Undefined variable 'nope'.\n[line 1]"
        );

        assert!(lox.run("var a = \"global\"; print a;").is_ok());
        assert!(lox
            .run("var later = \"seen\"; fun g() { print later; } g();")
            .is_ok());
        assert!(lox.run("print b;").had_runtime_error);

        assert_eq!(out.take(), "global\nseen\n");
    }

    #[test]
    fn errors_deep_in_calls_unwind_every_frame() {
        let source = r#"
            fun down(n) {
                var local = n;
                if (n == 0) return 1 / 0;
                return down(n - 1);
            }
            down(50);
        "#;
        let (mut lox, out) = session();

        assert!(lox.run(source).had_runtime_error);
        assert!(lox.run("var local = \"top\"; print local; print down;").is_ok());
        assert_eq!(out.take(), "top\n<fn down>\n");
    }

    #[test]
    fn deeply_nested_parentheses_run() {
        let output = with_main_stack(|| {
            let depth = 10_000;
            let source = format!("print {}1{};", "(".repeat(depth), ")".repeat(depth));
            run(&source)
        });

        assert_eq!(output, "1\n");
    }

    #[test]
    fn deeply_nested_blocks_and_unary_run() {
        let output = with_main_stack(|| {
            let depth = 10_000;
            let blocks = format!("{}print \"deep\";{}", "{".repeat(depth), "}".repeat(depth));
            let negations = format!("print {}7;", "-".repeat(depth));
            run(&blocks) + &run(&negations)
        });

        assert_eq!(output, "deep\n7\n");
    }

    #[test]
    fn repl_survives_deep_nesting() {
        let value = with_main_stack(|| {
            let (mut lox, _) = session();
            let depth = 10_000;
            let source = format!("{}2{} + 1", "(".repeat(depth), ")".repeat(depth));
            lox.run_repl(&source).value
        });

        assert_eq!(value.as_deref(), Some("3"));
    }

    #[test]
    fn session_state_persists_across_runs() {
        let (mut lox, out) = session();

        assert!(lox.run("var a = 1; fun bump() { a = a + 1; return a; }").is_ok());
        assert!(lox.run("print bump();").is_ok());
        assert!(!lox.run("print 1 / 0;").is_ok());
        assert!(lox.run("print bump();").is_ok());

        assert_eq!(out.take(), "2\n3\n");
    }

    #[test]
    fn repl_echoes_trailing_expression() {
        let (mut lox, out) = session();

        let outcome = lox.run_repl("var x = 40;");
        assert!(outcome.is_ok());
        assert_eq!(outcome.value, None);

        let outcome = lox.run_repl("x = x + 1; x + 1");
        assert_eq!(outcome.value.as_deref(), Some("42"));

        let outcome = lox.run_repl("\"s\" + x");
        assert_eq!(outcome.value.as_deref(), Some("s41"));

        let outcome = lox.run_repl("print x");
        assert!(outcome.had_static_error);

        assert_eq!(out.take(), "");
    }

    #[test]
    fn repl_closures_survive_between_lines() {
        let (mut lox, out) = session();

        assert!(lox
            .run_repl("fun make() { var n = 0; fun inc() { n = n + 1; return n; } return inc; }")
            .is_ok());
        assert!(lox.run_repl("var c = make();").is_ok());
        assert!(lox.run_repl("c();").is_ok());

        assert_eq!(lox.run_repl("c()").value.as_deref(), Some("2"));
        assert_eq!(out.take(), "");
    }
}
