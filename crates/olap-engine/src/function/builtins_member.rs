use crate::ast::Syntax;
use crate::calc::{Calc, CalcKind, HierarchySet, MemberProperty, Navigation};
use crate::compiler::Compiler;
use crate::error::{OlapError, OlapResult};
use crate::function::{arguments, FunctionSpec};
use crate::types::{Category, Type};

use Category as C;

inventory::submit! {
    FunctionSpec {
        name: "CurrentMember",
        syntax: Syntax::Property,
        parameters: &[C::Hierarchy],
        min_args: 1,
        repeat_last: false,
        return_category: C::Member,
        description: "Current member of a hierarchy in the evaluation context.",
        compile: current_member_fn,
    }
}

fn current_member_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [hierarchy] = arguments("CurrentMember", args)?;
    Ok(c.current_member(hierarchy))
}

inventory::submit! {
    FunctionSpec {
        name: "DefaultMember",
        syntax: Syntax::Property,
        parameters: &[C::Hierarchy],
        min_args: 1,
        repeat_last: false,
        return_category: C::Member,
        description: "Default member of a hierarchy.",
        compile: default_member_fn,
    }
}

fn default_member_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [hierarchy] = arguments("DefaultMember", args)?;
    let ty = Type::Member(hierarchy.constant_hierarchy());
    let deps = hierarchy.deps.clone();
    Ok(Calc::new(
        CalcKind::DefaultMember(Box::new(hierarchy)),
        ty,
        deps,
    ))
}

fn navigate(nav: Navigation, args: Vec<Calc>) -> OlapResult<Calc> {
    let [member] = arguments("member navigation", args)?;
    let ty = member.ty.clone();
    let deps = member.deps.clone();
    Ok(Calc::new(
        CalcKind::Navigate {
            nav,
            member: Box::new(member),
        },
        ty,
        deps,
    ))
}

macro_rules! navigation {
    ($fn_name:ident, $name:literal, $nav:expr, $doc:literal) => {
        inventory::submit! {
            FunctionSpec {
                name: $name,
                syntax: Syntax::Property,
                parameters: &[C::Member],
                min_args: 1,
                repeat_last: false,
                return_category: C::Member,
                description: $doc,
                compile: $fn_name,
            }
        }

        fn $fn_name(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
            navigate($nav, args)
        }
    };
}

navigation!(parent_fn, "Parent", Navigation::Parent, "Parent member, or the null member at the top.");
navigation!(first_child_fn, "FirstChild", Navigation::FirstChild, "First child, or the null member for a leaf.");
navigation!(last_child_fn, "LastChild", Navigation::LastChild, "Last child, or the null member for a leaf.");
navigation!(prev_member_fn, "PrevMember", Navigation::PrevMember, "Previous member on the same level.");
navigation!(next_member_fn, "NextMember", Navigation::NextMember, "Next member on the same level.");

fn lag(c: &Compiler<'_>, negate: bool, args: Vec<Calc>) -> OlapResult<Calc> {
    let [member, offset] = arguments("Lag", args)?;
    let ty = member.ty.clone();
    let deps = c.union_deps([&member, &offset]);
    Ok(Calc::new(
        CalcKind::Lag {
            member: Box::new(member),
            offset: Box::new(offset),
            negate,
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Lag",
        syntax: Syntax::Method,
        parameters: &[C::Member, C::Numeric],
        min_args: 2,
        repeat_last: false,
        return_category: C::Member,
        description: "Member n positions earlier on the same level.",
        compile: lag_fn,
    }
}

fn lag_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    lag(c, false, args)
}

inventory::submit! {
    FunctionSpec {
        name: "Lead",
        syntax: Syntax::Method,
        parameters: &[C::Member, C::Numeric],
        min_args: 2,
        repeat_last: false,
        return_category: C::Member,
        description: "Member n positions later on the same level.",
        compile: lead_fn,
    }
}

fn lead_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    lag(c, true, args)
}

inventory::submit! {
    FunctionSpec {
        name: "Ancestor",
        syntax: Syntax::Function,
        parameters: &[C::Member, C::Level],
        min_args: 2,
        repeat_last: false,
        return_category: C::Member,
        description: "Ancestor of a member at a level.",
        compile: ancestor_fn,
    }
}

fn ancestor_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [member, level] = arguments("Ancestor", args)?;
    let member_h = member.ty.known_hierarchies().first().copied();
    let level_h = match level.ty {
        Type::Level(h) => h,
        _ => None,
    };
    if let (Some(m), Some(l)) = (member_h, level_h) {
        if m != l {
            return Err(OlapError::TypeMismatch {
                context: "Ancestor".into(),
                expected: format!("a level of {}", c.hierarchy_name(m)),
                actual: format!("a level of {}", c.hierarchy_name(l)),
            });
        }
    }
    let deps = c.union_deps([&member, &level]);
    Ok(Calc::new(
        CalcKind::Ancestor {
            member: Box::new(member),
            level: Box::new(level),
        },
        Type::Member(member_h.or(level_h)),
        deps,
    ))
}

fn property(prop: MemberProperty, ty: Type, args: Vec<Calc>) -> OlapResult<Calc> {
    let [object] = arguments("property", args)?;
    let deps = object.deps.clone();
    Ok(Calc::new(
        CalcKind::Property {
            prop,
            object: Box::new(object),
        },
        ty,
        deps,
    ))
}

macro_rules! metadata_property {
    ($fn_name:ident, $name:literal, $prop:expr, $ret:expr, $ty:expr, [$($param:expr),+]) => {
        $(
            inventory::submit! {
                FunctionSpec {
                    name: $name,
                    syntax: Syntax::Property,
                    parameters: &[$param],
                    min_args: 1,
                    repeat_last: false,
                    return_category: $ret,
                    description: "Metadata property.",
                    compile: $fn_name,
                }
            }
        )+

        fn $fn_name(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
            property($prop, $ty, args)
        }
    };
}

metadata_property!(name_fn, "Name", MemberProperty::Name, C::String, Type::String, [C::Member, C::Level, C::Hierarchy, C::Dimension]);
metadata_property!(unique_name_fn, "UniqueName", MemberProperty::UniqueName, C::String, Type::String, [C::Member, C::Level, C::Hierarchy, C::Dimension]);
metadata_property!(ordinal_fn, "Ordinal", MemberProperty::Ordinal, C::Numeric, Type::Numeric, [C::Member, C::Level]);

inventory::submit! {
    FunctionSpec {
        name: "Level",
        syntax: Syntax::Property,
        parameters: &[C::Member],
        min_args: 1,
        repeat_last: false,
        return_category: C::Level,
        description: "Level of a member.",
        compile: level_fn,
    }
}

fn level_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [member] = arguments("Level", args)?;
    let ty = Type::Level(member.ty.known_hierarchies().first().copied());
    let deps = member.deps.clone();
    Ok(Calc::new(CalcKind::LevelOf(Box::new(member)), ty, deps))
}

inventory::submit! {
    FunctionSpec {
        name: "Hierarchy",
        syntax: Syntax::Property,
        parameters: &[C::Member],
        min_args: 1,
        repeat_last: false,
        return_category: C::Hierarchy,
        description: "Hierarchy of a member.",
        compile: hierarchy_fn,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Hierarchy",
        syntax: Syntax::Property,
        parameters: &[C::Level],
        min_args: 1,
        repeat_last: false,
        return_category: C::Hierarchy,
        description: "Hierarchy of a level.",
        compile: hierarchy_fn,
    }
}

fn hierarchy_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [object] = arguments("Hierarchy", args)?;
    let known = match &object.ty {
        Type::Member(h) | Type::Level(h) => *h,
        _ => None,
    };
    if let Some(h) = known {
        return Ok(Calc::new(
            CalcKind::Hierarchy(h),
            Type::Hierarchy(Some(h)),
            HierarchySet::new(),
        ));
    }
    let deps = object.deps.clone();
    Ok(Calc::new(
        CalcKind::HierarchyOf(Box::new(object)),
        Type::Hierarchy(None),
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Dimension",
        syntax: Syntax::Property,
        parameters: &[C::Member],
        min_args: 1,
        repeat_last: false,
        return_category: C::Dimension,
        description: "Dimension of a member.",
        compile: dimension_fn,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Dimension",
        syntax: Syntax::Property,
        parameters: &[C::Level],
        min_args: 1,
        repeat_last: false,
        return_category: C::Dimension,
        description: "Dimension of a level.",
        compile: dimension_fn,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Dimension",
        syntax: Syntax::Property,
        parameters: &[C::Hierarchy],
        min_args: 1,
        repeat_last: false,
        return_category: C::Dimension,
        description: "Dimension of a hierarchy.",
        compile: dimension_fn,
    }
}

fn dimension_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [object] = arguments("Dimension", args)?;
    let deps = object.deps.clone();
    Ok(Calc::new(
        CalcKind::DimensionOf(Box::new(object)),
        Type::Dimension,
        deps,
    ))
}
