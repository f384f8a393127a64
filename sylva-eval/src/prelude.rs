//! The bootstrap: default S-expression syntax, the macros that turn parse
//! trees into tree-construction calls, and every primitive form and
//! procedure. Installed through the same `set_syntax`/`add_macro`/
//! `add_primitive` path a user program would use.

use crate::error::{
    expect_bool, expect_closure, expect_cons, expect_nat, expect_string, expect_symbol, EvalError,
    EvalResult,
};
use crate::{Control, Evaluator};
use std::fs::File;
use std::io::Write;
use sylva_core::{escape_bytes, unescape_bytes, Closure, Tree, TreeRef};

/// Build a right-nested cons list from the given elements.
macro_rules! tlist {
    ($ev:expr $(,)?) => { $ev.nil() };
    ($ev:expr, $head:expr $(, $tail:expr)* $(,)?) => {{
        let head = $head;
        let tail = tlist!($ev $(, $tail)*);
        $ev.cons(head, tail)
    }};
}

macro_rules! nat_binary {
    ($ev:expr, $name:literal, $method:ident) => {
        $ev.add_primitive($name, true, |ev, _env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            let result = expect_nat(lhs)?.$method(expect_nat(rhs)?);
            Ok(Control::Done(ev.nat(result)))
        })
    };
}

macro_rules! nat_compare {
    ($ev:expr, $name:literal, $op:tt) => {
        $ev.add_primitive($name, true, |ev, _env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            let result = expect_nat(lhs)? $op expect_nat(rhs)?;
            Ok(Control::Done(ev.boolean(result)))
        })
    };
}

macro_rules! bool_binary {
    ($ev:expr, $name:literal, $op:expr) => {
        $ev.add_primitive($name, true, |ev, _env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            let op: fn(bool, bool) -> bool = $op;
            let result = op(expect_bool(lhs)?, expect_bool(rhs)?);
            Ok(Control::Done(ev.boolean(result)))
        })
    };
}

/// Base-autodetecting nat64 parser: `0x`/`0X` means hex, everything else
/// is decimal. A leading zero with more digits is rejected outright
/// instead of silently meaning octal.
fn parse_nat64<'heap>(bytes: &[u8], at: TreeRef<'heap>) -> EvalResult<'heap, u64> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| EvalError::partial("number literal is not valid UTF-8", at))?;
    if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(digits, 16)
            .map_err(|_| EvalError::partial(format!("cannot parse \"{}\" as nat64", text), at));
    }
    if text.len() > 1 && text.starts_with('0') {
        return Err(EvalError::partial(
            format!("ambiguous leading zero in \"{}\"", text),
            at,
        ));
    }
    text.parse::<u64>()
        .map_err(|_| EvalError::partial(format!("cannot parse \"{}\" as nat64", text), at))
}

impl<'io, 'heap> Evaluator<'io, 'heap> {
    pub(crate) fn install_prelude(&mut self) {
        self.install_default_syntax();
        self.install_forms();
        self.install_procedures();
    }

    // ----- tree-encoded lexer patterns -----

    fn p_chars(&self, bytes: &[u8]) -> TreeRef<'heap> {
        tlist![self, self.sym("char"), self.string(bytes)]
    }

    fn p_except(&self, bytes: &[u8]) -> TreeRef<'heap> {
        tlist![self, self.sym("except"), self.string(bytes)]
    }

    fn p_range(&self, lower: u8, upper: u8) -> TreeRef<'heap> {
        tlist![
            self,
            self.sym("range"),
            self.nat(lower as u64),
            self.nat(upper as u64)
        ]
    }

    fn p_word(&self, bytes: &[u8]) -> TreeRef<'heap> {
        tlist![self, self.sym("word"), self.string(bytes)]
    }

    fn p_utf8seg(&self) -> TreeRef<'heap> {
        tlist![self, self.sym("utf8seg")]
    }

    fn p_alt(&self, items: &[TreeRef<'heap>]) -> TreeRef<'heap> {
        self.cons(self.sym("alt"), self.list(items))
    }

    fn p_concat(&self, items: &[TreeRef<'heap>]) -> TreeRef<'heap> {
        self.cons(self.sym("concat"), self.list(items))
    }

    fn p_star(&self, inner: TreeRef<'heap>) -> TreeRef<'heap> {
        tlist![self, self.sym("star"), inner]
    }

    fn p_plus(&self, inner: TreeRef<'heap>) -> TreeRef<'heap> {
        tlist![self, self.sym("plus"), inner]
    }

    /// A `(symbol precedence)` pair at precedence 0.
    fn category(&self, name: &str) -> TreeRef<'heap> {
        tlist![self, self.sym(name), self.nat(0)]
    }

    fn pattern_entry(&self, name: &str, category: &str, body: TreeRef<'heap>) -> TreeRef<'heap> {
        tlist![self, self.sym(name), self.category(category), body]
    }

    fn rule_entry(&self, name: &str, lhs: &str, rhs: &[&str]) -> TreeRef<'heap> {
        let mut symbols = self.nil();
        for name in rhs.iter().rev() {
            symbols = self.cons(self.category(name), symbols);
        }
        tlist![self, self.sym(name), self.category(lhs), symbols]
    }

    // ----- default syntax and macros -----

    fn install_default_syntax(&mut self) {
        let blank = self.p_star(self.p_chars(b" \x0c\n\r\t\x0b"));
        let line_comment = self.p_concat(&[
            self.p_word(b"//"),
            self.p_star(self.p_except(b"\n\r")),
        ]);
        let block_comment = self.p_concat(&[
            self.p_word(b"/*"),
            self.p_star(self.p_concat(&[
                self.p_star(self.p_except(b"*")),
                self.p_plus(self.p_chars(b"*")),
                self.p_except(b"/"),
            ])),
            self.p_star(self.p_except(b"*")),
            self.p_plus(self.p_chars(b"*")),
            self.p_chars(b"/"),
        ]);
        let symbol_body = self.p_concat(&[
            self.p_alt(&[
                self.p_range(b'a', b'z'),
                self.p_range(b'A', b'Z'),
                self.p_chars(b"_'"),
                self.p_utf8seg(),
            ]),
            self.p_star(self.p_alt(&[
                self.p_range(b'a', b'z'),
                self.p_range(b'A', b'Z'),
                self.p_range(b'0', b'9'),
                self.p_chars(b"_'"),
                self.p_utf8seg(),
            ])),
        ]);
        let nat64_body = self.p_alt(&[
            self.p_plus(self.p_range(b'0', b'9')),
            self.p_concat(&[
                self.p_chars(b"0"),
                self.p_chars(b"xX"),
                self.p_plus(self.p_alt(&[
                    self.p_range(b'0', b'9'),
                    self.p_range(b'a', b'f'),
                    self.p_range(b'A', b'F'),
                ])),
            ]),
        ]);
        let string_body = self.p_concat(&[
            self.p_chars(b"\""),
            self.p_star(self.p_alt(&[
                self.p_except(b"\\\""),
                self.p_concat(&[self.p_chars(b"\\"), self.p_chars(b"\\\"abfnrtv")]),
            ])),
            self.p_chars(b"\""),
        ]);

        let patterns = self.list(&[
            self.pattern_entry("_", "_", blank),
            self.pattern_entry("_", "_", line_comment),
            self.pattern_entry("_", "_", block_comment),
            self.pattern_entry("symbol'", "tree", symbol_body),
            self.pattern_entry("nat64'", "tree", nat64_body),
            self.pattern_entry("string'", "tree", string_body),
            self.pattern_entry("_", "left_paren", self.p_word(b"(")),
            self.pattern_entry("_", "right_paren", self.p_word(b")")),
            self.pattern_entry("_", "period", self.p_word(b".")),
            self.pattern_entry("_", "quote", self.p_word(b"`")),
            self.pattern_entry("_", "comma", self.p_word(b",")),
        ]);

        let rules = self.list(&[
            self.rule_entry("nil'", "list", &[]),
            self.rule_entry("cons'", "list", &["tree", "list"]),
            self.rule_entry("period'", "list", &["tree", "period", "tree"]),
            self.rule_entry("quote'", "tree", &["quote", "tree"]),
            self.rule_entry("unquote'", "tree", &["comma", "tree"]),
            self.rule_entry("tree'", "tree", &["left_paren", "list", "right_paren"]),
            self.rule_entry("id'", "_", &["tree"]),
        ]);

        self.set_syntax(patterns, rules)
            .expect("bootstrap syntax is well-formed");

        // Each grammar rule rewrites to the matching tree constructor.
        let env = self.global_env();

        let formal = tlist![self, self.sym("s")];
        let body = tlist![self, tlist![self, self.sym("string_symbol"), self.sym("s")]];
        self.add_macro("symbol'", Closure { env, formal, body });

        let formal = tlist![self, self.sym("n")];
        let body = tlist![self, tlist![self, self.sym("string_nat64"), self.sym("n")]];
        self.add_macro("nat64'", Closure { env, formal, body });

        // Strip the surrounding quotes, then undo the escapes.
        let formal = tlist![self, self.sym("s")];
        let body = tlist![
            self,
            tlist![
                self,
                self.sym("string_unescape"),
                tlist![
                    self,
                    self.sym("string_substr"),
                    self.sym("s"),
                    self.nat(1),
                    tlist![
                        self,
                        self.sym("sub"),
                        tlist![self, self.sym("string_length"), self.sym("s")],
                        self.nat(2)
                    ]
                ]
            ]
        ];
        self.add_macro("string'", Closure { env, formal, body });

        let formal = tlist![self];
        let body = tlist![self, tlist![self, self.sym("nil")]];
        self.add_macro("nil'", Closure { env, formal, body });

        let formal = tlist![self, self.sym("l"), self.sym("r")];
        let body = tlist![
            self,
            tlist![self, self.sym("cons"), self.sym("l"), self.sym("r")]
        ];
        self.add_macro("cons'", Closure { env, formal, body });

        let formal = tlist![self, self.sym("l")];
        let body = tlist![self, self.sym("l")];
        self.add_macro("id'", Closure { env, formal, body });

        let formal = tlist![self, self.sym("l"), self.sym("_"), self.sym("r")];
        let body = tlist![
            self,
            tlist![self, self.sym("cons"), self.sym("l"), self.sym("r")]
        ];
        self.add_macro("period'", Closure { env, formal, body });

        let formal = tlist![self, self.sym("_"), self.sym("l")];
        let body = tlist![
            self,
            tlist![
                self,
                self.sym("list"),
                tlist![self, self.sym("string_symbol"), self.string(b"quote")],
                self.sym("l")
            ]
        ];
        self.add_macro("quote'", Closure { env, formal, body });

        let formal = tlist![self, self.sym("_"), self.sym("l")];
        let body = tlist![
            self,
            tlist![
                self,
                self.sym("list"),
                tlist![self, self.sym("string_symbol"), self.string(b"unquote")],
                self.sym("l")
            ]
        ];
        self.add_macro("unquote'", Closure { env, formal, body });

        let formal = tlist![self, self.sym("_"), self.sym("l"), self.sym("_")];
        let body = tlist![self, self.sym("l")];
        self.add_macro("tree'", Closure { env, formal, body });
    }

    // ----- primitive forms (unevaluated arguments) -----

    fn install_forms(&mut self) {
        self.add_primitive("lambda", false, |ev, env, e| {
            let (formal, body) = expect_cons(e)?;
            Ok(Control::Done(ev.alloc(Tree::Closure(Closure {
                env,
                formal,
                body,
            }))))
        });

        self.add_primitive("cond", false, |ev, env, e| {
            let (test, t) = expect_cons(e)?;
            let (if_true, u) = expect_cons(t)?;
            let if_false = match u {
                Tree::Cons(cell) => cell.head(),
                _ => ev.unit(),
            };
            let taken = expect_bool(ev.eval(env, test)?)?;
            Ok(Control::Tail {
                env,
                expr: if taken { if_true } else { if_false },
            })
        });

        self.add_primitive("quote", false, |ev, env, e| {
            let quoted = ev.quasiquote(env, expect_cons(e)?.0)?;
            Ok(Control::Done(quoted))
        });

        self.add_primitive("unquote", false, |ev, env, e| {
            let value = ev.eval(env, expect_cons(e)?.0)?;
            Ok(Control::Done(value))
        });

        self.add_primitive("match", false, |ev, env, e| {
            let (head, t) = expect_cons(e)?;
            let (clauses, _) = expect_cons(t)?;
            let target = ev.eval(env, head)?;
            for clause in clauses.iter_list() {
                let (pat, u) = expect_cons(clause)?;
                let mut clause_env = env;
                if ev.match_pattern(target, pat, &mut clause_env, false)? {
                    let (expr, _) = expect_cons(u)?;
                    return Ok(Control::Tail {
                        env: clause_env,
                        expr,
                    });
                }
            }
            let mut message = String::from("nonexhaustive patterns: { ");
            let mut first = true;
            for clause in clauses.iter_list() {
                let (pat, _) = expect_cons(clause)?;
                if !first {
                    message.push_str(", ");
                }
                first = false;
                message.push_str(&pat.to_string());
            }
            message.push_str(&format!(" }} ?= {}", target));
            Err(EvalError::partial(message, clauses))
        });

        // Sequential binding; later definitions see earlier ones.
        self.add_primitive("let", false, |ev, env, e| {
            let (defs, es) = expect_cons(e)?;
            let mut env = env;
            for def in defs.iter_list() {
                let (lhs, t) = expect_cons(def)?;
                let (rhs, _) = expect_cons(t)?;
                let name = expect_symbol(lhs)?;
                let value = ev.eval(env, rhs)?;
                env = ev.extend(env, name, value);
            }
            let expr = ev.begin_list(env, es)?;
            Ok(Control::Tail { env, expr })
        });

        // Sequential with forward references: every name is pre-bound to
        // the #unit placeholder, then the slots are assigned in order.
        self.add_primitive("letrec", false, |ev, env, e| {
            let (defs, es) = expect_cons(e)?;
            let mut env = env;
            let mut slots = Vec::new();
            for def in defs.iter_list() {
                let (lhs, _) = expect_cons(def)?;
                let name = expect_symbol(lhs)?;
                let (extended, slot) = ev.declare(env, name);
                env = extended;
                slots.push(slot);
            }
            for (def, slot) in defs.iter_list().zip(slots) {
                let (_, t) = expect_cons(def)?;
                let (rhs, _) = expect_cons(t)?;
                let value = ev.eval(env, rhs)?;
                slot.set(value);
            }
            let expr = ev.begin_list(env, es)?;
            Ok(Control::Tail { env, expr })
        });

        self.add_primitive("define", false, |ev, env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            let name = expect_symbol(lhs)?;
            let value = ev.eval(env, rhs)?;
            ev.global_env = ev.extend(ev.global_env, name, value);
            Ok(Control::Done(ev.unit()))
        });

        self.add_primitive("define_macro", false, |ev, env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            let name = expect_symbol(lhs)?;
            let closure = expect_closure(ev.eval(env, rhs)?)?;
            ev.add_macro(name, closure);
            Ok(Control::Done(ev.unit()))
        });

        // Overwrite an existing binding in lexical scope.
        self.add_primitive("set", false, |ev, env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            let value = ev.eval(env, rhs)?;
            let name = expect_symbol(lhs)?;
            for entry in env.iter_list() {
                let entry = match entry {
                    Tree::Cons(cell) => cell,
                    _ => continue,
                };
                let slot = match entry.tail() {
                    Tree::Cons(cell) => cell,
                    _ => continue,
                };
                if matches!(entry.head(), Tree::Symbol(bound) if *bound == name) {
                    slot.head.set(value);
                    return Ok(Control::Done(ev.unit()));
                }
            }
            Err(EvalError::partial(
                format!("unbound symbol \"{}\"", name),
                lhs,
            ))
        });

        self.add_primitive("begin", false, |ev, env, e| {
            let expr = ev.begin_list(env, e)?;
            Ok(Control::Tail { env, expr })
        });
    }

    // ----- primitive procedures (evaluated arguments) -----

    fn install_procedures(&mut self) {
        // Restart the interpreter loop on the given expression, under the
        // optional environment.
        self.add_primitive("eval", true, |_ev, env, e| {
            let (expr, t) = expect_cons(e)?;
            let env = match t {
                Tree::Cons(cell) => cell.head(),
                _ => env,
            };
            Ok(Control::Tail { env, expr })
        });

        self.add_primitive("env", true, |_ev, env, _e| Ok(Control::Done(env)));

        self.add_primitive("get_syntax", true, |ev, _env, _e| {
            Ok(Control::Done(ev.cons(
                ev.patterns,
                ev.cons(ev.rules, ev.nil()),
            )))
        });

        self.add_primitive("set_syntax", true, |ev, _env, e| {
            let (patterns, t) = expect_cons(e)?;
            let (rules, _) = expect_cons(t)?;
            ev.set_syntax(patterns, rules)?;
            Ok(Control::Done(ev.unit()))
        });

        self.add_primitive("get_global_env", true, |ev, _env, _e| {
            Ok(Control::Done(ev.global_env))
        });

        self.add_primitive("set_global_env", true, |ev, _env, e| {
            ev.global_env = expect_cons(e)?.0;
            Ok(Control::Done(ev.unit()))
        });

        self.add_primitive("nil", true, |ev, _env, _e| Ok(Control::Done(ev.nil())));

        self.add_primitive("cons", true, |ev, _env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            Ok(Control::Done(ev.cons(lhs, rhs)))
        });

        self.add_primitive("list", true, |_ev, _env, e| Ok(Control::Done(e)));

        self.add_primitive("id", true, |_ev, _env, e| {
            Ok(Control::Done(expect_cons(e)?.0))
        });

        self.add_primitive("string_symbol", true, |ev, _env, e| {
            let (arg, _) = expect_cons(e)?;
            let bytes = expect_string(arg)?;
            let name = std::str::from_utf8(bytes)
                .map_err(|_| EvalError::partial("symbol name is not valid UTF-8", arg))?;
            Ok(Control::Done(ev.sym(name)))
        });

        self.add_primitive("string_nat64", true, |ev, _env, e| {
            let (arg, _) = expect_cons(e)?;
            let value = parse_nat64(expect_string(arg)?, arg)?;
            Ok(Control::Done(ev.nat(value)))
        });

        self.add_primitive("string_escape", true, |ev, _env, e| {
            let (arg, _) = expect_cons(e)?;
            let escaped = escape_bytes(expect_string(arg)?);
            Ok(Control::Done(ev.string(&escaped)))
        });

        self.add_primitive("string_unescape", true, |ev, _env, e| {
            let (arg, _) = expect_cons(e)?;
            let unescaped = unescape_bytes(expect_string(arg)?)
                .map_err(|err| EvalError::partial(err.to_string(), arg))?;
            Ok(Control::Done(ev.string(&unescaped)))
        });

        self.add_primitive("string_length", true, |ev, _env, e| {
            let (arg, _) = expect_cons(e)?;
            Ok(Control::Done(ev.nat(expect_string(arg)?.len() as u64)))
        });

        self.add_primitive("string_char", true, |ev, _env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            let bytes = expect_string(lhs)?;
            let index = expect_nat(rhs)? as usize;
            match bytes.get(index) {
                Some(&byte) => Ok(Control::Done(ev.nat(byte as u64))),
                None => Err(EvalError::partial(
                    format!("index {} out of range", index),
                    rhs,
                )),
            }
        });

        self.add_primitive("char_string", true, |ev, _env, e| {
            let (arg, _) = expect_cons(e)?;
            let code = expect_nat(arg)?;
            if code >= 256 {
                return Err(EvalError::partial(
                    format!("character code {} out of range", code),
                    arg,
                ));
            }
            Ok(Control::Done(ev.string(&[code as u8])))
        });

        self.add_primitive("string_concat", true, |ev, _env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            let mut joined = expect_string(lhs)?.to_vec();
            joined.extend_from_slice(expect_string(rhs)?);
            Ok(Control::Done(ev.string(&joined)))
        });

        // Position clamps to the string end; length truncates.
        self.add_primitive("string_substr", true, |ev, _env, e| {
            let (s, t) = expect_cons(e)?;
            let (pos, u) = expect_cons(t)?;
            let (len, _) = expect_cons(u)?;
            let bytes = expect_string(s)?;
            let pos = (expect_nat(pos)? as usize).min(bytes.len());
            let end = pos.saturating_add(expect_nat(len)? as usize).min(bytes.len());
            Ok(Control::Done(ev.string(&bytes[pos..end])))
        });

        self.add_primitive("string_eq", true, |ev, _env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            Ok(Control::Done(
                ev.boolean(expect_string(lhs)? == expect_string(rhs)?),
            ))
        });

        // Nat64 arithmetic wraps.
        self.add_primitive("minus", true, |ev, _env, e| {
            let (arg, _) = expect_cons(e)?;
            Ok(Control::Done(ev.nat(expect_nat(arg)?.wrapping_neg())))
        });
        nat_binary!(self, "add", wrapping_add);
        nat_binary!(self, "sub", wrapping_sub);
        nat_binary!(self, "mul", wrapping_mul);
        self.add_primitive("div", true, |ev, _env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            let divisor = expect_nat(rhs)?;
            if divisor == 0 {
                return Err(EvalError::partial("division by zero", rhs));
            }
            Ok(Control::Done(ev.nat(expect_nat(lhs)? / divisor)))
        });
        self.add_primitive("mod", true, |ev, _env, e| {
            let (lhs, t) = expect_cons(e)?;
            let (rhs, _) = expect_cons(t)?;
            let divisor = expect_nat(rhs)?;
            if divisor == 0 {
                return Err(EvalError::partial("division by zero", rhs));
            }
            Ok(Control::Done(ev.nat(expect_nat(lhs)? % divisor)))
        });
        nat_compare!(self, "le", <=);
        nat_compare!(self, "lt", <);
        nat_compare!(self, "ge", >=);
        nat_compare!(self, "gt", >);
        nat_compare!(self, "eq", ==);
        nat_compare!(self, "neq", !=);

        self.add_primitive("not", true, |ev, _env, e| {
            let (arg, _) = expect_cons(e)?;
            Ok(Control::Done(ev.boolean(!expect_bool(arg)?)))
        });
        bool_binary!(self, "and", |a, b| a && b);
        bool_binary!(self, "or", |a, b| a || b);
        bool_binary!(self, "implies", |a, b| !a || b);
        bool_binary!(self, "iff", |a, b| a == b);

        self.add_primitive("print", true, |ev, _env, e| {
            let (arg, _) = expect_cons(e)?;
            Ok(Control::Done(ev.string(arg.to_string().as_bytes())))
        });

        self.add_primitive("display", true, |ev, _env, e| {
            let (arg, _) = expect_cons(e)?;
            let bytes = expect_string(arg)?;
            ev.stdout
                .write_all(bytes)
                .and_then(|_| ev.stdout.write_all(b"\n"))
                .expect("writing to stdout failed");
            Ok(Control::Done(ev.unit()))
        });

        self.add_primitive("debug_save_file", true, |ev, _env, e| {
            let (path, t) = expect_cons(e)?;
            let (content, _) = expect_cons(t)?;
            let name = String::from_utf8_lossy(expect_string(path)?).into_owned();
            let content = expect_string(content)?;
            let mut file = File::create(&name)
                .map_err(|_| EvalError::partial(format!("could not open file \"{}\"", name), path))?;
            file.write_all(content)
                .and_then(|_| file.write_all(b"\n"))
                .map_err(|_| EvalError::partial(format!("could not write file \"{}\"", name), path))?;
            Ok(Control::Done(ev.unit()))
        });
    }
}
