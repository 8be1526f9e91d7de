//! Function registry.
//!
//! Every built-in is a [`FunctionSpec`] registered with [`inventory::submit!`] next to its
//! compile function. The registry groups overloads by `(name, syntax)`; the compiler scores
//! each overload against the argument types and lowers the call with the winner's
//! `compile` function.
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::ast::Syntax;
use crate::calc::Calc;
use crate::compiler::Compiler;
use crate::error::{OlapError, OlapResult};
use crate::types::{conversion, Category, Conversion};

mod builtins_member;
mod builtins_scalar;
mod builtins_set;

pub type CompileFn = fn(&Compiler<'_>, Vec<Calc>) -> OlapResult<Calc>;

#[derive(Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub syntax: Syntax,
    pub parameters: &'static [Category],
    /// Arguments past `min_args` are optional.
    pub min_args: usize,
    /// The last parameter may repeat.
    pub repeat_last: bool,
    pub return_category: Category,
    pub description: &'static str,
    pub compile: CompileFn,
}

impl std::fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("syntax", &self.syntax)
            .field("parameters", &self.parameters)
            .finish()
    }
}

inventory::collect!(FunctionSpec);

impl FunctionSpec {
    pub fn accepts_arity(&self, n: usize) -> bool {
        n >= self.min_args && (n <= self.parameters.len() || self.repeat_last)
    }

    pub fn parameter(&self, i: usize) -> Option<Category> {
        self.parameters
            .get(i)
            .or_else(|| self.repeat_last.then(|| self.parameters.last()).flatten())
            .copied()
    }

    /// Total conversion cost for `args`, or `None` when some argument cannot be converted.
    pub fn score(&self, args: &[Category]) -> Option<u32> {
        if !self.accepts_arity(args.len()) {
            return None;
        }
        let mut total = 0;
        for (i, arg) in args.iter().enumerate() {
            let (cost, _) = conversion(*arg, self.parameter(i)?)?;
            total += cost;
        }
        Some(total)
    }

    pub fn conversions(&self, args: &[Category]) -> Vec<(Category, Conversion)> {
        args.iter()
            .enumerate()
            .filter_map(|(i, arg)| {
                let target = self.parameter(i)?;
                conversion(*arg, target).map(|(_, conv)| (target, conv))
            })
            .collect()
    }
}

/// Iterate every registered overload.
pub fn iter_function_specs() -> impl Iterator<Item = &'static FunctionSpec> {
    inventory::iter::<FunctionSpec>.into_iter()
}

type RegistryKey = (String, Syntax);

fn registry() -> &'static HashMap<RegistryKey, Vec<&'static FunctionSpec>> {
    static REGISTRY: OnceLock<HashMap<RegistryKey, Vec<&'static FunctionSpec>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<RegistryKey, Vec<&'static FunctionSpec>> = HashMap::new();
        for spec in inventory::iter::<FunctionSpec> {
            map.entry((spec.name.to_ascii_uppercase(), spec.syntax))
                .or_default()
                .push(spec);
        }
        map
    })
}

pub fn lookup_overloads(name: &str, syntax: Syntax) -> &'static [&'static FunctionSpec] {
    registry()
        .get(&(name.to_ascii_uppercase(), syntax))
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Overload with the lowest conversion cost; `None` when nothing matches or the best cost is
/// shared by several overloads.
pub fn resolve(name: &str, syntax: Syntax, args: &[Category]) -> Option<&'static FunctionSpec> {
    let mut best: Option<(u32, &'static FunctionSpec)> = None;
    let mut tied = false;
    for spec in lookup_overloads(name, syntax) {
        let Some(score) = spec.score(args) else {
            continue;
        };
        match best {
            Some((current, _)) if score > current => {}
            Some((current, _)) if score == current => tied = true,
            _ => {
                best = Some((score, spec));
                tied = false;
            }
        }
    }
    match best {
        Some((_, spec)) if !tied => Some(spec),
        _ => None,
    }
}

/// Split converted arguments of a fixed-arity overload.
pub(crate) fn arguments<const N: usize>(name: &str, args: Vec<Calc>) -> OlapResult<[Calc; N]> {
    let found = args.len();
    args.try_into().map_err(|_| OlapError::TypeMismatch {
        context: name.to_string(),
        expected: format!("{N} arguments"),
        actual: format!("{found} arguments"),
    })
}

/// Value of a constant symbol argument such as `DESC` or `ALL`, upper-cased.
pub(crate) fn symbol(name: &str, arg: &Calc, allowed: &[&str]) -> OlapResult<String> {
    let flag = arg
        .constant_value()
        .and_then(|v| v.as_str())
        .map(str::to_ascii_uppercase);
    match flag {
        Some(flag) if allowed.contains(&flag.as_str()) => Ok(flag),
        _ => Err(OlapError::TypeMismatch {
            context: name.to_string(),
            expected: allowed.join(" | "),
            actual: arg.ty.to_string(),
        }),
    }
}

/// Render a call shape the way it was written, e.g. `Filter(<Set>, <Numeric>)`.
pub fn signature(name: &str, syntax: Syntax, args: &[Category]) -> String {
    let labels: Vec<&str> = args.iter().map(|c| c.label()).collect();
    match syntax {
        Syntax::Function | Syntax::Internal => format!("{name}({})", labels.join(", ")),
        Syntax::Method => match labels.split_first() {
            Some((recv, rest)) => format!("{recv}.{name}({})", rest.join(", ")),
            None => format!(".{name}()"),
        },
        Syntax::Property => match labels.first() {
            Some(recv) => format!("{recv}.{name}"),
            None => format!(".{name}"),
        },
        Syntax::Infix => format!(
            "{} {name} {}",
            labels.first().unwrap_or(&""),
            labels.get(1).unwrap_or(&"")
        ),
        Syntax::Prefix => format!("{name} {}", labels.first().unwrap_or(&"")),
        Syntax::Braces => format!("{{{}}}", labels.join(", ")),
        Syntax::Parentheses => format!("({})", labels.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn registry_groups_overloads() {
        assert!(lookup_overloads("iif", Syntax::Function).len() >= 4);
        assert!(!lookup_overloads("Members", Syntax::Property).is_empty());
        assert!(lookup_overloads("Members", Syntax::Function).is_empty());
    }

    #[test]
    fn numeric_overload_wins_for_member_operands() {
        let spec = resolve("=", Syntax::Infix, &[Category::Member, Category::Member]).unwrap();
        assert_eq!(spec.parameters, &[Category::Numeric, Category::Numeric]);
    }

    #[test]
    fn unresolved_signatures_render_like_calls() {
        assert!(resolve("Filter", Syntax::Function, &[Category::Set, Category::Numeric]).is_none());
        assert_eq!(
            signature("Filter", Syntax::Function, &[Category::Set, Category::Numeric]),
            "Filter(<Set>, <Numeric>)"
        );
        assert_eq!(
            signature("Lag", Syntax::Method, &[Category::Member, Category::String]),
            "<Member>.Lag(<String>)"
        );
        assert_eq!(
            signature("+", Syntax::Infix, &[Category::Set, Category::String]),
            "<Set> + <String>"
        );
        assert_eq!(signature("-", Syntax::Infix, &[]), " - ");
    }

    #[test]
    fn every_spec_has_consistent_arity() {
        for spec in iter_function_specs() {
            assert!(spec.min_args <= spec.parameters.len(), "{spec:?}");
            assert!(!spec.repeat_last || !spec.parameters.is_empty(), "{spec:?}");
        }
    }
}
