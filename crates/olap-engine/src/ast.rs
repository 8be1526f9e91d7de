//! Raw expression trees handed to the compiler by the (external) parser.
use std::fmt;

use olap_model::{DimensionId, HierarchyId, LevelId, MemberId, Value};

/// How a call was written; functions are registered per syntax, so `x.Members` and
/// `Members(x)` are distinct lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Syntax {
    /// `Name(args)`
    Function,
    /// `arg0.Name(args)`
    Method,
    /// `arg0.Name`
    Property,
    /// `arg0 op arg1`
    Infix,
    /// `op arg0`
    Prefix,
    /// `{args}`
    Braces,
    /// `(args)`
    Parentheses,
    /// Produced by rewrites, never by the parser.
    Internal,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Exp {
    Literal(Value),
    Null,
    Member(MemberId),
    Level(LevelId),
    Hierarchy(HierarchyId),
    Dimension(DimensionId),
    /// Unique name (`[Time].[1997].[Q1]`, `[Measures].[Profit]`, `[Store].[State]`), resolved
    /// against the cube and the query's calculated members at compile time.
    Name(String),
    Call {
        name: String,
        syntax: Syntax,
        args: Vec<Exp>,
    },
}

impl Exp {
    pub fn number(n: f64) -> Exp {
        Exp::Literal(Value::from(n))
    }

    pub fn string(s: &str) -> Exp {
        Exp::Literal(Value::from(s))
    }

    pub fn boolean(b: bool) -> Exp {
        Exp::Literal(Value::Boolean(b))
    }

    pub fn name(unique_name: &str) -> Exp {
        Exp::Name(unique_name.to_string())
    }

    pub fn call(name: &str, syntax: Syntax, args: Vec<Exp>) -> Exp {
        Exp::Call {
            name: name.to_string(),
            syntax,
            args,
        }
    }

    pub fn function(name: &str, args: Vec<Exp>) -> Exp {
        Exp::call(name, Syntax::Function, args)
    }

    pub fn method(self, name: &str, mut args: Vec<Exp>) -> Exp {
        args.insert(0, self);
        Exp::call(name, Syntax::Method, args)
    }

    pub fn property(self, name: &str) -> Exp {
        Exp::call(name, Syntax::Property, vec![self])
    }

    pub fn infix(self, op: &str, rhs: Exp) -> Exp {
        Exp::call(op, Syntax::Infix, vec![self, rhs])
    }

    pub fn prefix(op: &str, arg: Exp) -> Exp {
        Exp::call(op, Syntax::Prefix, vec![arg])
    }

    pub fn set(items: Vec<Exp>) -> Exp {
        Exp::call("{}", Syntax::Braces, items)
    }

    pub fn tuple(items: Vec<Exp>) -> Exp {
        Exp::call("()", Syntax::Parentheses, items)
    }
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, args: &[Exp]) -> fmt::Result {
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{a}")?;
            }
            Ok(())
        }
        match self {
            Exp::Literal(Value::Text(s)) => write!(f, "\"{s}\""),
            Exp::Literal(v) => write!(f, "{v}"),
            Exp::Null => f.write_str("NULL"),
            Exp::Member(id) => write!(f, "<member {id}>"),
            Exp::Level(id) => write!(f, "<level {id}>"),
            Exp::Hierarchy(id) => write!(f, "<hierarchy {id}>"),
            Exp::Dimension(id) => write!(f, "<dimension {id}>"),
            Exp::Name(name) => f.write_str(name),
            Exp::Call { name, syntax, args } => match syntax {
                Syntax::Function | Syntax::Internal => {
                    write!(f, "{name}(")?;
                    list(f, args)?;
                    f.write_str(")")
                }
                Syntax::Method => {
                    let (recv, rest) = args.split_first().ok_or(fmt::Error)?;
                    write!(f, "{recv}.{name}(")?;
                    list(f, rest)?;
                    f.write_str(")")
                }
                Syntax::Property => match args.first() {
                    Some(recv) => write!(f, "{recv}.{name}"),
                    None => f.write_str(name),
                },
                Syntax::Infix => match args.as_slice() {
                    [l, r] => write!(f, "({l} {name} {r})"),
                    _ => write!(f, "{name}"),
                },
                Syntax::Prefix => match args.first() {
                    Some(a) => write!(f, "{name} {a}"),
                    None => f.write_str(name),
                },
                Syntax::Braces => {
                    f.write_str("{")?;
                    list(f, args)?;
                    f.write_str("}")
                }
                Syntax::Parentheses => {
                    f.write_str("(")?;
                    list(f, args)?;
                    f.write_str(")")
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn displays_like_the_source_text() {
        let exp = Exp::function(
            "Filter",
            vec![
                Exp::name("[Store].[Country]").property("Members"),
                Exp::name("[Measures].[Unit Sales]").infix(">", Exp::number(100.0)),
            ],
        );
        assert_eq!(
            exp.to_string(),
            "Filter([Store].[Country].Members, ([Measures].[Unit Sales] > 100))"
        );
    }
}
