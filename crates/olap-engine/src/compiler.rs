//! Expression compiler: raw [`Exp`] trees to typed [`Calc`] plans.
//!
//! Compilation resolves names against the cube and the query's calculated members, picks a
//! function overload for every call, inserts the implicit conversions the overload needs,
//! folds constant sub-trees and computes each node's dependency set. All type errors surface
//! here, never during evaluation.
use olap_model::{CubeId, HierarchyId, MemberId, MemberKind, Schema, Value};

use crate::ast::{Exp, Syntax};
use crate::calc::{Calc, CalcKind, HierarchySet};
use crate::cancel::ExecutionHandle;
use crate::config::EngineConfig;
use crate::context::EvalContext;
use crate::error::{OlapError, OlapResult};
use crate::evaluator::{Evaluator, NoCells};
use crate::function::{self, FunctionSpec};
use crate::members::{CalculatedMember, CalculatedMembers, MemberCatalog};
use crate::types::{Category, Conversion, Type};

/// Flags written as bare identifiers in MDX (`Order(s, x, DESC)`), compiled as strings.
const SYMBOLS: &[&str] = &[
    "ASC",
    "DESC",
    "BASC",
    "BDESC",
    "ALL",
    "EXCLUDEEMPTY",
    "INCLUDEEMPTY",
];

pub struct Compiler<'a> {
    pub(crate) schema: &'a Schema,
    pub(crate) cube: CubeId,
    pub(crate) hierarchies: Vec<HierarchyId>,
    pub(crate) overlay: CalculatedMembers,
    pub(crate) config: &'a EngineConfig,
}

impl<'a> Compiler<'a> {
    pub fn new(schema: &'a Schema, cube: CubeId, config: &'a EngineConfig) -> Self {
        Self {
            schema,
            cube,
            hierarchies: schema.cube_hierarchies(cube),
            overlay: CalculatedMembers::default(),
            config,
        }
    }

    pub fn catalog(&self) -> MemberCatalog<'_> {
        MemberCatalog::new(self.schema, &self.overlay)
    }

    pub(crate) fn into_overlay(self) -> CalculatedMembers {
        self.overlay
    }

    pub fn hierarchy_name(&self, h: HierarchyId) -> String {
        self.schema.hierarchy(h).unique_name.clone()
    }

    /// Every hierarchy of the cube.
    pub fn all_deps(&self) -> HierarchySet {
        self.hierarchies.iter().copied().collect()
    }

    pub fn union_deps<'c>(&self, calcs: impl IntoIterator<Item = &'c Calc>) -> HierarchySet {
        let mut deps = HierarchySet::new();
        for c in calcs {
            deps.union_with(&c.deps);
        }
        deps
    }

    /// Dependencies of a node that evaluates `body` once per tuple of `set`: the body's
    /// dependencies on the iterated hierarchies are satisfied by the iteration itself.
    pub fn iteration_deps(&self, set: &Calc, body: &Calc) -> HierarchySet {
        let iterated = self.iterated_hierarchies(&set.ty);
        let mut deps = set.deps.clone();
        deps.union_with(&body.deps.without(iterated));
        deps
    }

    fn iterated_hierarchies(&self, ty: &Type) -> Vec<HierarchyId> {
        ty.known_hierarchies()
    }

    /// Reject two members of one hierarchy in a tuple type.
    pub fn check_distinct(&self, hierarchies: &[Option<HierarchyId>]) -> OlapResult<()> {
        let known: Vec<HierarchyId> = hierarchies.iter().flatten().copied().collect();
        for (i, h) in known.iter().enumerate() {
            if known[..i].contains(h) {
                return Err(OlapError::DuplicateHierarchyInTuple {
                    hierarchy: self.hierarchy_name(*h),
                });
            }
        }
        Ok(())
    }

    /// Compile and require a result of `expected` category, converting when possible.
    pub fn compile_as(&self, exp: &Exp, expected: Category) -> OlapResult<Calc> {
        let calc = self.compile(exp)?;
        let actual = calc.ty.category();
        match crate::types::conversion(actual, expected) {
            Some((_, conv)) => self.convert(calc, expected, conv),
            None => Err(OlapError::ResultTypeMismatch {
                expected: expected.label().to_string(),
                actual: calc.ty.to_string(),
            }),
        }
    }

    pub fn compile(&self, exp: &Exp) -> OlapResult<Calc> {
        match exp {
            Exp::Literal(value) => Ok(Calc::constant(
                value.clone(),
                match value {
                    Value::Null => Type::Null,
                    Value::Boolean(_) => Type::Logical,
                    Value::Number(_) => Type::Numeric,
                    Value::Text(_) => Type::String,
                },
            )),
            Exp::Null => Ok(Calc::constant(Value::Null, Type::Null)),
            Exp::Member(id) => self.member_calc(*id, &id.to_string()),
            Exp::Level(id) => Ok(Calc::new(
                CalcKind::Level(*id),
                Type::Level(Some(self.schema.level(*id).hierarchy)),
                HierarchySet::new(),
            )),
            Exp::Hierarchy(id) => Ok(Calc::new(
                CalcKind::Hierarchy(*id),
                Type::Hierarchy(Some(*id)),
                HierarchySet::new(),
            )),
            Exp::Dimension(id) => Ok(Calc::new(
                CalcKind::Dimension(*id),
                Type::Dimension,
                HierarchySet::new(),
            )),
            Exp::Name(name) => self.resolve_name(name),
            Exp::Call { name, syntax, args } => {
                if *syntax == Syntax::Parentheses && args.len() == 1 {
                    return self.compile(&args[0]);
                }
                let compiled = args
                    .iter()
                    .map(|a| self.compile(a))
                    .collect::<OlapResult<Vec<_>>>()?;
                self.resolve_call(name, *syntax, compiled)
            }
        }
    }

    fn member_calc(&self, id: MemberId, label: &str) -> OlapResult<Calc> {
        let catalog = self.catalog();
        match catalog.hierarchy_of(id) {
            Some(h) => Ok(Calc::member(id, h)),
            None => Err(OlapError::UnknownMember(label.to_string())),
        }
    }

    fn resolve_name(&self, name: &str) -> OlapResult<Calc> {
        if let Some(id) = self.catalog().lookup(self.cube, name) {
            return self.member_calc(id, name);
        }
        if let Some(h) = self.schema.hierarchy_by_unique_name(self.cube, name) {
            return self.compile(&Exp::Hierarchy(h));
        }
        if let Some(l) = self.schema.level_by_unique_name(self.cube, name) {
            return self.compile(&Exp::Level(l));
        }
        let wanted = name.trim();
        if let Some(d) = self
            .schema
            .cube(self.cube)
            .dimensions
            .iter()
            .copied()
            .find(|d| self.schema.dimension(*d).unique_name.eq_ignore_ascii_case(wanted))
        {
            return self.compile(&Exp::Dimension(d));
        }
        if let Some(symbol) = SYMBOLS.iter().find(|s| s.eq_ignore_ascii_case(wanted)) {
            return Ok(Calc::constant(Value::from(*symbol), Type::String));
        }
        if self.config.ignore_invalid_members {
            if let Some(h) = self.hierarchy_prefix(name) {
                log::warn!(
                    "unknown member {name}; using the null member of {}",
                    self.hierarchy_name(h)
                );
                return Ok(Calc::member(self.schema.hierarchy(h).null_member, h));
            }
        }
        Err(OlapError::UnknownMember(name.to_string()))
    }

    /// Hierarchy whose unique name is the longest prefix of `name`.
    fn hierarchy_prefix(&self, name: &str) -> Option<HierarchyId> {
        let lower = name.trim().to_ascii_lowercase();
        self.hierarchies
            .iter()
            .copied()
            .filter(|h| {
                let unique = self.schema.hierarchy(*h).unique_name.to_ascii_lowercase();
                lower.starts_with(&format!("{unique}."))
            })
            .max_by_key(|h| self.schema.hierarchy(*h).unique_name.len())
    }

    pub fn resolve_call(&self, name: &str, syntax: Syntax, args: Vec<Calc>) -> OlapResult<Calc> {
        let categories: Vec<Category> = args.iter().map(|a| a.ty.category()).collect();
        let spec: &FunctionSpec = function::resolve(name, syntax, &categories).ok_or_else(|| {
            OlapError::UnresolvedFunction {
                signature: function::signature(name, syntax, &categories),
            }
        })?;
        let conversions = spec.conversions(&categories);
        let converted = args
            .into_iter()
            .zip(conversions)
            .map(|(arg, (target, conv))| self.convert(arg, target, conv))
            .collect::<OlapResult<Vec<_>>>()?;
        let calc = (spec.compile)(self, converted)?;
        Ok(self.fold(calc))
    }

    /// Apply an implicit conversion chosen by overload resolution.
    pub fn convert(&self, calc: Calc, target: Category, conv: Conversion) -> OlapResult<Calc> {
        Ok(match conv {
            Conversion::None => calc,
            Conversion::NullToScalar => Calc::constant(
                Value::Null,
                match target {
                    Category::String => Type::String,
                    Category::Logical => Type::Logical,
                    _ => Type::Numeric,
                },
            ),
            Conversion::MemberToTuple => {
                let ty = Type::Tuple(calc.ty.hierarchies());
                let deps = calc.deps.clone();
                Calc::new(CalcKind::Tuple(vec![calc]), ty, deps)
            }
            Conversion::CellValue => self.cell_value(
                calc,
                match target {
                    Category::String => Type::String,
                    Category::Logical => Type::Logical,
                    _ => Type::Numeric,
                },
            ),
            Conversion::ToSet => self.to_set(calc),
            Conversion::NumericToString => {
                let deps = calc.deps.clone();
                Calc::new(CalcKind::ToText(Box::new(calc)), Type::String, deps)
            }
            Conversion::CurrentMember => {
                let member = self.current_member(calc);
                match target {
                    Category::Member => member,
                    other => {
                        let (_, next) = crate::types::conversion(Category::Member, other)
                            .ok_or_else(|| OlapError::TypeMismatch {
                                context: "implicit current member".into(),
                                expected: other.label().into(),
                                actual: "<Member>".into(),
                            })?;
                        self.convert(member, other, next)?
                    }
                }
            }
            Conversion::DimensionToHierarchy => {
                let hierarchy = self.dimension_hierarchy(calc);
                match target {
                    Category::Hierarchy => hierarchy,
                    _ => self.convert(hierarchy, target, Conversion::CurrentMember)?,
                }
            }
        })
    }

    /// Value of the cell at a member or tuple.
    pub fn cell_value(&self, at: Calc, ty: Type) -> Calc {
        let fixed = at.ty.known_hierarchies();
        let mut deps = self.all_deps().without(fixed);
        deps.union_with(&at.deps);
        Calc::new(CalcKind::CellValue(Box::new(at)), ty, deps)
    }

    pub fn to_set(&self, calc: Calc) -> Calc {
        let ty = Type::Set(Box::new(calc.ty.element()));
        let deps = calc.deps.clone();
        Calc::new(CalcKind::ToSet(Box::new(calc)), ty, deps)
    }

    pub fn current_member(&self, hierarchy: Calc) -> Calc {
        match hierarchy.constant_hierarchy() {
            Some(h) => Calc::new(
                CalcKind::CurrentMember(h),
                Type::Member(Some(h)),
                HierarchySet::single(h),
            ),
            None => Calc::new(
                CalcKind::DynamicCurrentMember(Box::new(hierarchy)),
                Type::Member(None),
                self.all_deps(),
            ),
        }
    }

    pub fn dimension_hierarchy(&self, dimension: Calc) -> Calc {
        if let CalcKind::Dimension(d) = dimension.kind {
            if let Some(h) = self.schema.dimension(d).hierarchies.first() {
                return Calc::new(
                    CalcKind::Hierarchy(*h),
                    Type::Hierarchy(Some(*h)),
                    HierarchySet::new(),
                );
            }
        }
        let deps = dimension.deps.clone();
        Calc::new(
            CalcKind::DimensionHierarchy(Box::new(dimension)),
            Type::Hierarchy(None),
            deps,
        )
    }

    /// Replace a node whose inputs are all constant and which reads neither the context nor
    /// the cube by its value.
    pub fn fold(&self, calc: Calc) -> Calc {
        if !calc.deps.is_empty() || !is_foldable(&calc.kind) {
            return calc;
        }
        let all_constant = calc.children().iter().all(|c| is_constant(&c.kind));
        if !all_constant {
            return calc;
        }
        let handle = ExecutionHandle::new();
        let mut cells = NoCells;
        let catalog = self.catalog();
        let context = EvalContext::new(self.schema, self.cube);
        let mut evaluator = Evaluator::new(catalog, context, &mut cells, &handle, self.config);
        let folded = match calc.ty.category() {
            Category::Numeric | Category::String | Category::Logical | Category::Null => evaluator
                .eval_scalar(&calc)
                .map(|v| Calc::constant(v, calc.ty.clone())),
            Category::Member => evaluator
                .eval_member(&calc)
                .map(|m| Calc::new(CalcKind::Member(m), calc.ty.clone(), HierarchySet::new())),
            Category::Level => evaluator
                .eval_level(&calc)
                .map(|l| Calc::new(CalcKind::Level(l), calc.ty.clone(), HierarchySet::new())),
            Category::Hierarchy => evaluator.eval_hierarchy(&calc).map(|h| {
                Calc::new(CalcKind::Hierarchy(h), calc.ty.clone(), HierarchySet::new())
            }),
            Category::Dimension => evaluator.eval_dimension(&calc).map(|d| {
                Calc::new(CalcKind::Dimension(d), calc.ty.clone(), HierarchySet::new())
            }),
            _ => return calc,
        };
        match folded {
            Ok(constant) => constant,
            Err(_) => calc,
        }
    }

    /// Register a calculated member. Its formula is compiled separately by
    /// [`Compiler::define_formula`] so members may refer to each other.
    pub fn declare_member(
        &mut self,
        hierarchy: HierarchyId,
        name: &str,
        parent: Option<&str>,
        solve_order: i32,
    ) -> OlapResult<MemberId> {
        let invalid = |reason: &str| OlapError::InvalidCalculatedMember {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let h = self.schema.hierarchy(hierarchy);
        let parent = match parent {
            Some(parent_name) => {
                let id = self
                    .schema
                    .member_by_unique_name(self.cube, parent_name)
                    .ok_or_else(|| invalid(&format!("unknown parent {parent_name}")))?;
                let parent_member = self
                    .schema
                    .member(id)
                    .ok_or_else(|| invalid("unknown parent"))?;
                if parent_member.hierarchy != hierarchy {
                    return Err(invalid("parent belongs to another hierarchy"));
                }
                if parent_member.kind == MemberKind::Null {
                    return Err(invalid("parent is the null member"));
                }
                Some(id)
            }
            None if h.is_measures => None,
            None => h.all_member,
        };
        let level = match parent.and_then(|p| self.schema.member(p)) {
            Some(p) => {
                let depth = self.schema.level(p.level).depth as usize;
                h.levels.get(depth + 1).copied().unwrap_or(p.level)
            }
            None => h.levels[0],
        };
        let unique_name = format!(
            "{}.[{name}]",
            match parent.and_then(|p| self.schema.member(p)) {
                Some(p) if p.kind == MemberKind::Regular => p.unique_name.clone(),
                _ => h.unique_name.clone(),
            }
        );
        if self.schema.member_by_unique_name(self.cube, &unique_name).is_some() {
            return Err(invalid("a stored member has the same name"));
        }
        let dimension = h.dimension;
        let schema = self.schema;
        self.overlay
            .push(schema, |id| CalculatedMember {
                id,
                name: name.to_string(),
                unique_name,
                hierarchy,
                dimension,
                level,
                parent,
                solve_order,
            })
            .ok_or_else(|| invalid("defined more than once"))
    }

    pub fn define_formula(&mut self, member: MemberId, formula: &Exp) -> OlapResult<()> {
        let calc = self.compile_as(formula, Category::Value).map_err(|err| match err {
            OlapError::ResultTypeMismatch { actual, .. } => OlapError::InvalidCalculatedMember {
                name: self.catalog().name(member).to_string(),
                reason: format!("formula has type {actual}, expected a value"),
            },
            other => other,
        })?;
        let schema = self.schema;
        self.overlay.set_formula(schema, member, calc);
        Ok(())
    }
}

fn is_constant(kind: &CalcKind) -> bool {
    matches!(
        kind,
        CalcKind::Constant(_)
            | CalcKind::Member(_)
            | CalcKind::Level(_)
            | CalcKind::Hierarchy(_)
            | CalcKind::Dimension(_)
    )
}

fn is_foldable(kind: &CalcKind) -> bool {
    matches!(
        kind,
        CalcKind::Binary { .. }
            | CalcKind::Unary { .. }
            | CalcKind::IIf { .. }
            | CalcKind::IsEmpty(_)
            | CalcKind::CoalesceEmpty(_)
            | CalcKind::ToText(_)
            | CalcKind::Property { .. }
            | CalcKind::IsMember { .. }
            | CalcKind::DefaultMember(_)
            | CalcKind::Navigate { .. }
            | CalcKind::Lag { .. }
            | CalcKind::Ancestor { .. }
            | CalcKind::LevelOf(_)
            | CalcKind::HierarchyOf(_)
            | CalcKind::DimensionOf(_)
            | CalcKind::DimensionHierarchy(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use olap_model::test_support::food_mart;
    use pretty_assertions::assert_eq;

    fn compile(exp: &Exp) -> OlapResult<Calc> {
        let (schema, ids) = food_mart();
        let config = EngineConfig::default();
        Compiler::new(&schema, ids.cube, &config).compile(exp)
    }

    #[test]
    fn constant_arithmetic_and_navigation_fold() {
        let sum = compile(&Exp::number(1.0).infix("+", Exp::number(2.0))).unwrap();
        assert_eq!(sum.constant_value(), Some(&Value::from(3.0)));

        let (_, ids) = food_mart();
        let parent = compile(&Exp::name("[Time].[1997].[Q2]").property("Parent")).unwrap();
        assert_eq!(parent.constant_member(), Some(ids.y1997));
    }

    #[test]
    fn cell_reads_depend_on_the_hierarchies_they_leave_open() {
        let (_, ids) = food_mart();
        let current = compile(&Exp::name("[Time]").property("CurrentMember")).unwrap();
        assert!(current.depends_on(ids.time));
        assert!(!current.depends_on(ids.store));

        let filtered = compile(&Exp::function(
            "Filter",
            vec![
                Exp::name("[Time].[Quarter]").property("Members"),
                Exp::name("[Measures].[Unit Sales]").infix(">", Exp::number(1.0)),
            ],
        ))
        .unwrap();
        assert!(!filtered.depends_on(ids.time));
        assert!(filtered.depends_on(ids.store));
        assert!(filtered.depends_on(ids.gender));
    }

    #[test]
    fn a_tuple_may_not_repeat_a_hierarchy() {
        let err = compile(&Exp::tuple(vec![
            Exp::name("[Time].[1997]"),
            Exp::name("[Time].[1998]"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            OlapError::DuplicateHierarchyInTuple {
                hierarchy: "[Time]".into()
            }
        );
    }

    #[test]
    fn extract_targets_must_be_distinct() {
        let crossed = Exp::function(
            "CrossJoin",
            vec![
                Exp::set(vec![Exp::name("[Time].[1997]")]),
                Exp::set(vec![Exp::name("[Store].[USA]")]),
            ],
        );
        let err = compile(&Exp::function(
            "Extract",
            vec![crossed, Exp::name("[Time]"), Exp::name("[Time]")],
        ))
        .unwrap_err();
        assert!(matches!(err, OlapError::DuplicateExtractTarget { .. }), "{err:?}");
    }

    #[test]
    fn unknown_members_fail_unless_ignored() {
        let missing = Exp::name("[Time].[2042]");
        assert_eq!(
            compile(&missing).unwrap_err(),
            OlapError::UnknownMember("[Time].[2042]".into())
        );

        let (schema, ids) = food_mart();
        let config = EngineConfig {
            ignore_invalid_members: true,
            ..EngineConfig::default()
        };
        let calc = Compiler::new(&schema, ids.cube, &config)
            .compile(&missing)
            .unwrap();
        assert_eq!(
            calc.constant_member(),
            Some(schema.hierarchy(ids.time).null_member)
        );
    }

    #[test]
    fn unresolved_calls_and_result_types_are_compile_errors() {
        assert!(matches!(
            compile(&Exp::function("NoSuchFunction", vec![])),
            Err(OlapError::UnresolvedFunction { .. })
        ));

        let (schema, ids) = food_mart();
        let config = EngineConfig::default();
        let compiler = Compiler::new(&schema, ids.cube, &config);
        assert!(matches!(
            compiler.compile_as(&Exp::string("x"), Category::Set),
            Err(OlapError::ResultTypeMismatch { .. })
        ));
    }

    #[test]
    fn calculated_members_get_unique_names() {
        let (schema, ids) = food_mart();
        let config = EngineConfig::default();
        let mut compiler = Compiler::new(&schema, ids.cube, &config);

        let delta = compiler.declare_member(ids.time, "Delta", None, 0).unwrap();
        assert_eq!(compiler.catalog().unique_name(delta), "[Time].[Delta]");
        let child = compiler
            .declare_member(ids.time, "H1", Some("[Time].[1997]"), 0)
            .unwrap();
        assert_eq!(compiler.catalog().unique_name(child), "[Time].[1997].[H1]");

        assert!(matches!(
            compiler.declare_member(ids.time, "Delta", None, 0),
            Err(OlapError::InvalidCalculatedMember { .. })
        ));
        assert!(matches!(
            compiler.declare_member(ids.time, "1997", None, 0),
            Err(OlapError::InvalidCalculatedMember { .. })
        ));
        assert!(matches!(
            compiler.declare_member(ids.time, "X", Some("[Store].[USA]"), 0),
            Err(OlapError::InvalidCalculatedMember { .. })
        ));

        let growth = Exp::name("[Time].[1998]").infix("-", Exp::name("[Time].[1997]"));
        compiler.define_formula(delta, &growth).unwrap();
        assert!(compiler.catalog().formula(delta).is_some());
    }
}
