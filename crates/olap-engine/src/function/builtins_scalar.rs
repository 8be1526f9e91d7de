use crate::ast::Syntax;
use crate::calc::{BinaryOp, Calc, CalcKind, UnaryOp};
use crate::compiler::Compiler;
use crate::error::{OlapError, OlapResult};
use crate::function::{arguments, FunctionSpec};
use crate::types::{Category, Type};

use Category as C;

fn binary(c: &Compiler<'_>, op: BinaryOp, ty: Type, args: Vec<Calc>) -> OlapResult<Calc> {
    let [left, right] = arguments("binary operator", args)?;
    let deps = c.union_deps([&left, &right]);
    Ok(Calc::new(
        CalcKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        ty,
        deps,
    ))
}

/// Registers one binary operator overload backed by [`binary`].
macro_rules! binary_operator {
    ($fn_name:ident, $name:literal, $op:expr, [$l:expr, $r:expr] => $ret:expr, $ty:expr, $doc:literal) => {
        inventory::submit! {
            FunctionSpec {
                name: $name,
                syntax: Syntax::Infix,
                parameters: &[$l, $r],
                min_args: 2,
                repeat_last: false,
                return_category: $ret,
                description: $doc,
                compile: $fn_name,
            }
        }

        fn $fn_name(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
            binary(c, $op, $ty, args)
        }
    };
}

binary_operator!(add_fn, "+", BinaryOp::Add, [C::Numeric, C::Numeric] => C::Numeric, Type::Numeric, "Addition; a null operand counts as zero unless both are null.");
binary_operator!(sub_fn, "-", BinaryOp::Sub, [C::Numeric, C::Numeric] => C::Numeric, Type::Numeric, "Subtraction; a null operand counts as zero unless both are null.");
binary_operator!(mul_fn, "*", BinaryOp::Mul, [C::Numeric, C::Numeric] => C::Numeric, Type::Numeric, "Multiplication.");
binary_operator!(div_fn, "/", BinaryOp::Div, [C::Numeric, C::Numeric] => C::Numeric, Type::Numeric, "Division; dividing by zero yields an empty value.");
binary_operator!(concat_fn, "||", BinaryOp::Concat, [C::String, C::String] => C::String, Type::String, "String concatenation.");
binary_operator!(and_fn, "AND", BinaryOp::And, [C::Logical, C::Logical] => C::Logical, Type::Logical, "Logical conjunction.");
binary_operator!(or_fn, "OR", BinaryOp::Or, [C::Logical, C::Logical] => C::Logical, Type::Logical, "Logical disjunction.");
binary_operator!(xor_fn, "XOR", BinaryOp::Xor, [C::Logical, C::Logical] => C::Logical, Type::Logical, "Exclusive or.");

binary_operator!(eq_num_fn, "=", BinaryOp::Eq, [C::Numeric, C::Numeric] => C::Logical, Type::Logical, "Numeric equality.");
binary_operator!(ne_num_fn, "<>", BinaryOp::Ne, [C::Numeric, C::Numeric] => C::Logical, Type::Logical, "Numeric inequality.");
binary_operator!(lt_num_fn, "<", BinaryOp::Lt, [C::Numeric, C::Numeric] => C::Logical, Type::Logical, "Numeric less than.");
binary_operator!(le_num_fn, "<=", BinaryOp::Le, [C::Numeric, C::Numeric] => C::Logical, Type::Logical, "Numeric less than or equal.");
binary_operator!(gt_num_fn, ">", BinaryOp::Gt, [C::Numeric, C::Numeric] => C::Logical, Type::Logical, "Numeric greater than.");
binary_operator!(ge_num_fn, ">=", BinaryOp::Ge, [C::Numeric, C::Numeric] => C::Logical, Type::Logical, "Numeric greater than or equal.");

binary_operator!(eq_str_fn, "=", BinaryOp::Eq, [C::String, C::String] => C::Logical, Type::Logical, "String equality.");
binary_operator!(ne_str_fn, "<>", BinaryOp::Ne, [C::String, C::String] => C::Logical, Type::Logical, "String inequality.");
binary_operator!(lt_str_fn, "<", BinaryOp::Lt, [C::String, C::String] => C::Logical, Type::Logical, "String less than.");
binary_operator!(le_str_fn, "<=", BinaryOp::Le, [C::String, C::String] => C::Logical, Type::Logical, "String less than or equal.");
binary_operator!(gt_str_fn, ">", BinaryOp::Gt, [C::String, C::String] => C::Logical, Type::Logical, "String greater than.");
binary_operator!(ge_str_fn, ">=", BinaryOp::Ge, [C::String, C::String] => C::Logical, Type::Logical, "String greater than or equal.");

fn unary(op: UnaryOp, ty: Type, args: Vec<Calc>) -> OlapResult<Calc> {
    let [arg] = arguments("unary operator", args)?;
    let deps = arg.deps.clone();
    Ok(Calc::new(
        CalcKind::Unary {
            op,
            arg: Box::new(arg),
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "-",
        syntax: Syntax::Prefix,
        parameters: &[C::Numeric],
        min_args: 1,
        repeat_last: false,
        return_category: C::Numeric,
        description: "Negation.",
        compile: neg_fn,
    }
}

fn neg_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    unary(UnaryOp::Neg, Type::Numeric, args)
}

inventory::submit! {
    FunctionSpec {
        name: "NOT",
        syntax: Syntax::Prefix,
        parameters: &[C::Logical],
        min_args: 1,
        repeat_last: false,
        return_category: C::Logical,
        description: "Logical negation.",
        compile: not_fn,
    }
}

fn not_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    unary(UnaryOp::Not, Type::Logical, args)
}

fn iif(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [cond, then, otherwise] = arguments("IIf", args)?;
    let ty = merge_branch_types(&then.ty, &otherwise.ty)?;
    let deps = c.union_deps([&cond, &then, &otherwise]);
    Ok(Calc::new(
        CalcKind::IIf {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
        ty,
        deps,
    ))
}

/// Result type of a two-branch expression; hierarchies that differ become unknown.
fn merge_branch_types(a: &Type, b: &Type) -> OlapResult<Type> {
    if a == b {
        return Ok(a.clone());
    }
    Ok(match (a, b) {
        (Type::Member(_), Type::Member(_)) => Type::Member(None),
        (Type::Set(x), Type::Set(y)) => match (x.as_ref(), y.as_ref()) {
            (Type::Empty, other) | (other, Type::Empty) => Type::Set(Box::new(other.clone())),
            _ => {
                let (xa, ya) = (a.arity(), b.arity());
                if xa != ya {
                    return Err(OlapError::TypeMismatch {
                        context: "IIf".into(),
                        expected: a.to_string(),
                        actual: b.to_string(),
                    });
                }
                let hierarchies = a
                    .hierarchies()
                    .into_iter()
                    .zip(b.hierarchies())
                    .map(|(x, y)| if x == y { x } else { None })
                    .collect();
                Type::Set(Box::new(Type::element_of(hierarchies)))
            }
        },
        (Type::Null, other) | (other, Type::Null) => other.clone(),
        _ => a.clone(),
    })
}

inventory::submit! {
    FunctionSpec {
        name: "IIf",
        syntax: Syntax::Function,
        parameters: &[C::Logical, C::Numeric, C::Numeric],
        min_args: 3,
        repeat_last: false,
        return_category: C::Numeric,
        description: "Numeric branch on a condition.",
        compile: iif,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "IIf",
        syntax: Syntax::Function,
        parameters: &[C::Logical, C::String, C::String],
        min_args: 3,
        repeat_last: false,
        return_category: C::String,
        description: "String branch on a condition.",
        compile: iif,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "IIf",
        syntax: Syntax::Function,
        parameters: &[C::Logical, C::Member, C::Member],
        min_args: 3,
        repeat_last: false,
        return_category: C::Member,
        description: "Member branch on a condition.",
        compile: iif,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "IIf",
        syntax: Syntax::Function,
        parameters: &[C::Logical, C::Set, C::Set],
        min_args: 3,
        repeat_last: false,
        return_category: C::Set,
        description: "Set branch on a condition.",
        compile: iif,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "IsEmpty",
        syntax: Syntax::Function,
        parameters: &[C::Value],
        min_args: 1,
        repeat_last: false,
        return_category: C::Logical,
        description: "True when the value is empty.",
        compile: is_empty_fn,
    }
}

fn is_empty_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [arg] = arguments("IsEmpty", args)?;
    let deps = arg.deps.clone();
    Ok(Calc::new(
        CalcKind::IsEmpty(Box::new(arg)),
        Type::Logical,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "CoalesceEmpty",
        syntax: Syntax::Function,
        parameters: &[C::Numeric, C::Numeric],
        min_args: 2,
        repeat_last: true,
        return_category: C::Numeric,
        description: "First non-empty numeric argument.",
        compile: coalesce_numeric_fn,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "CoalesceEmpty",
        syntax: Syntax::Function,
        parameters: &[C::String, C::String],
        min_args: 2,
        repeat_last: true,
        return_category: C::String,
        description: "First non-empty string argument.",
        compile: coalesce_string_fn,
    }
}

fn coalesce(c: &Compiler<'_>, ty: Type, args: Vec<Calc>) -> Calc {
    let deps = c.union_deps(&args);
    Calc::new(CalcKind::CoalesceEmpty(args), ty, deps)
}

fn coalesce_numeric_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    Ok(coalesce(c, Type::Numeric, args))
}

fn coalesce_string_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    Ok(coalesce(c, Type::String, args))
}

inventory::submit! {
    FunctionSpec {
        name: "IS",
        syntax: Syntax::Infix,
        parameters: &[C::Member, C::Member],
        min_args: 2,
        repeat_last: false,
        return_category: C::Logical,
        description: "Member identity.",
        compile: is_fn,
    }
}

fn is_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [left, right] = arguments("IS", args)?;
    let deps = c.union_deps([&left, &right]);
    Ok(Calc::new(
        CalcKind::IsMember {
            left: Box::new(left),
            right: Box::new(right),
        },
        Type::Logical,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Value",
        syntax: Syntax::Property,
        parameters: &[C::Tuple],
        min_args: 1,
        repeat_last: false,
        return_category: C::Numeric,
        description: "Value of the cell at a member or tuple.",
        compile: value_fn,
    }
}

fn value_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [tuple] = arguments("Value", args)?;
    Ok(c.cell_value(tuple, Type::Numeric))
}
