//! Evaluation of compiled plans against an [`EvalContext`].
//!
//! Every operation that moves the context (set iteration, tuple cell reads, calculated
//! member expansion) runs inside [`Evaluator::scoped`], which restores the context on every
//! exit path. Cell reads go through a [`CellReader`]; a reader that has not loaded a cell yet
//! answers `Pending`, which evaluates as empty for this pass.
use std::cmp::Ordering;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use olap_model::{cmp_values, Aggregator, DimensionId, HierarchyId, LevelId, MemberId, Value};

use crate::aggregation::{CellLookup, CellRequest};
use crate::calc::{
    BinaryOp, Calc, CalcKind, MemberProperty, Navigation, SetAggregate, SetCombine, Tuple,
    UnaryOp,
};
use crate::cancel::ExecutionHandle;
use crate::config::EngineConfig;
use crate::context::EvalContext;
use crate::error::{OlapError, OlapResult};
use crate::members::MemberCatalog;
use crate::types::Category;

pub use crate::aggregation::{CellReader, NoCells};

/// Memo of `Exists` lookup tables for one evaluation pass, keyed by node and the context it
/// read.
#[derive(Default)]
pub struct MemoTable {
    exists: AHashMap<(usize, Tuple), Rc<ExistsIndex>>,
}

impl MemoTable {
    pub fn len(&self) -> usize {
        self.exists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exists.is_empty()
    }
}

pub struct Evaluator<'a> {
    catalog: MemberCatalog<'a>,
    ctx: EvalContext,
    cells: &'a mut dyn CellReader,
    handle: &'a ExecutionHandle,
    config: &'a EngineConfig,
    memo: MemoTable,
    calc_depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        catalog: MemberCatalog<'a>,
        ctx: EvalContext,
        cells: &'a mut dyn CellReader,
        handle: &'a ExecutionHandle,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            catalog,
            ctx,
            cells,
            handle,
            config,
            memo: MemoTable::default(),
            calc_depth: 0,
        }
    }

    pub fn context(&self) -> &EvalContext {
        &self.ctx
    }

    /// Run `f` and roll the context back afterwards, whether `f` succeeds or not.
    pub fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> OlapResult<T>) -> OlapResult<T> {
        let savepoint = self.ctx.savepoint();
        let result = f(self);
        self.ctx.restore(savepoint);
        result
    }

    /// Make every member of `tuple` current in its hierarchy.
    pub fn set_tuple(&mut self, tuple: &[MemberId]) -> OlapResult<()> {
        for member in tuple {
            let h = self
                .catalog
                .hierarchy_of(*member)
                .ok_or_else(|| OlapError::eval(format!("member {member} no longer exists")))?;
            self.ctx.set(h, *member)?;
        }
        Ok(())
    }

    /// Value of the cell at the current coordinate.
    pub fn cell_value(&mut self) -> OlapResult<Value> {
        self.handle.check()?;
        let catalog = self.catalog;
        let coordinate: Tuple = self.ctx.members().iter().copied().collect();
        if coordinate.iter().any(|m| catalog.is_null(*m)) {
            return Ok(Value::Null);
        }

        let mut expand: Option<(i32, usize, MemberId)> = None;
        for (slot, member) in coordinate.iter().enumerate() {
            if let Some(calc) = catalog.calculated(*member) {
                if expand.map_or(true, |(order, _, _)| calc.solve_order > order) {
                    expand = Some((calc.solve_order, slot, *member));
                }
            }
        }
        if let Some((_, slot, member)) = expand {
            return self.expand_calculated(slot, member);
        }

        let Some(request) =
            CellRequest::for_coordinate(catalog.schema, self.ctx.cube(), &coordinate)
        else {
            return Ok(Value::Null);
        };
        Ok(match self.cells.read(&request, self.handle)? {
            CellLookup::Ready(value) => value,
            CellLookup::Pending => Value::Null,
        })
    }

    fn expand_calculated(&mut self, slot: usize, member: MemberId) -> OlapResult<Value> {
        let catalog = self.catalog;
        let formula = catalog.formula(member).ok_or_else(|| {
            OlapError::eval(format!("{} has no formula", catalog.unique_name(member)))
        })?;
        if self.calc_depth >= self.config.max_calc_depth {
            return Err(OlapError::RecursionLimit {
                member: catalog.unique_name(member).to_string(),
                depth: self.config.max_calc_depth,
            });
        }
        let hierarchy = self.ctx.hierarchies()[slot];
        self.calc_depth += 1;
        let result = self.scoped(|ev| {
            ev.ctx.set(hierarchy, catalog.default_member(hierarchy))?;
            ev.eval_scalar(formula)
        });
        self.calc_depth -= 1;
        result
    }

    fn null_member_of(&self, member: MemberId) -> OlapResult<MemberId> {
        self.catalog
            .hierarchy_of(member)
            .map(|h| self.catalog.null_member(h))
            .ok_or_else(|| OlapError::eval(format!("member {member} no longer exists")))
    }

    fn number(&mut self, calc: &Calc) -> OlapResult<Option<f64>> {
        let value = self.eval_scalar(calc)?;
        match value {
            Value::Null => Ok(None),
            other => other
                .as_f64()
                .map(Some)
                .ok_or_else(|| OlapError::eval(format!("expected a number, got {other}"))),
        }
    }

    fn truthy(&mut self, calc: &Calc) -> OlapResult<bool> {
        self.eval_scalar(calc)?
            .truthy()
            .map_err(|e| OlapError::eval(format!("expected a logical value, got {}", e.actual)))
    }

    fn count(&mut self, calc: &Calc) -> OlapResult<usize> {
        Ok(self.number(calc)?.map_or(0, |n| if n < 0.0 { 0 } else { n as usize }))
    }

    pub fn eval_scalar(&mut self, calc: &Calc) -> OlapResult<Value> {
        use CalcKind as K;
        match &calc.kind {
            K::Constant(value) => Ok(value.clone()),
            K::Binary { op, left, right } => self.binary(*op, left, right),
            K::Unary { op, arg } => match op {
                UnaryOp::Neg => Ok(self.number(arg)?.map_or(Value::Null, |n| Value::from(-n))),
                UnaryOp::Not => Ok(Value::Boolean(!self.truthy(arg)?)),
            },
            K::IIf {
                cond,
                then,
                otherwise,
            } => {
                if self.truthy(cond)? {
                    self.eval_scalar(then)
                } else {
                    self.eval_scalar(otherwise)
                }
            }
            K::IsEmpty(arg) => Ok(Value::Boolean(self.eval_scalar(arg)?.is_null())),
            K::CoalesceEmpty(items) => {
                for item in items {
                    let value = self.eval_scalar(item)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            K::CellValue(at) => {
                let tuple = self.eval_tuple(at)?;
                self.scoped(|ev| {
                    ev.set_tuple(&tuple)?;
                    ev.cell_value()
                })
            }
            K::ToText(arg) => Ok(match self.eval_scalar(arg)? {
                Value::Null => Value::from(""),
                other => Value::from(other.to_string()),
            }),
            K::Property { prop, object } => self.property(*prop, object),
            K::IsMember { left, right } => {
                Ok(Value::Boolean(self.eval_member(left)? == self.eval_member(right)?))
            }
            K::Count { set, include_empty } => {
                let tuples = self.eval_list(set)?;
                if *include_empty {
                    return Ok(Value::from(tuples.len() as f64));
                }
                let mut n = 0usize;
                for tuple in &tuples {
                    self.handle.check()?;
                    let value = self.scoped(|ev| {
                        ev.set_tuple(tuple)?;
                        ev.cell_value()
                    })?;
                    if !value.is_null() {
                        n += 1;
                    }
                }
                Ok(Value::from(n as f64))
            }
            K::SetAggregate { func, set, value } => {
                self.set_aggregate(*func, set, value.as_deref())
            }
            _ => Err(OlapError::eval(format!(
                "{} is not a scalar expression",
                calc.ty
            ))),
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Calc, right: &Calc) -> OlapResult<Value> {
        match op {
            BinaryOp::And => {
                return Ok(Value::Boolean(self.truthy(left)? && self.truthy(right)?));
            }
            BinaryOp::Or => {
                return Ok(Value::Boolean(self.truthy(left)? || self.truthy(right)?));
            }
            _ => {}
        }
        let l = self.eval_scalar(left)?;
        let r = self.eval_scalar(right)?;
        let number = |v: &Value| -> OlapResult<Option<f64>> {
            match v {
                Value::Null => Ok(None),
                other => other
                    .as_f64()
                    .map(Some)
                    .ok_or_else(|| OlapError::eval(format!("expected a number, got {other}"))),
            }
        };
        let compare = |expect: fn(Ordering) -> bool| {
            if l.is_null() || r.is_null() {
                return Value::Boolean(false);
            }
            let ordering = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => cmp_values(&l, &r),
            };
            Value::Boolean(expect(ordering))
        };
        Ok(match op {
            BinaryOp::Add | BinaryOp::Sub => match (number(&l)?, number(&r)?) {
                (None, None) => Value::Null,
                (a, b) => {
                    let (a, b) = (a.unwrap_or(0.0), b.unwrap_or(0.0));
                    Value::from(if op == BinaryOp::Add { a + b } else { a - b })
                }
            },
            BinaryOp::Mul => match (number(&l)?, number(&r)?) {
                (Some(a), Some(b)) => Value::from(a * b),
                _ => Value::Null,
            },
            BinaryOp::Div => match (number(&l)?, number(&r)?) {
                (Some(_), Some(b)) if b == 0.0 => Value::Null,
                (Some(a), Some(b)) => Value::from(a / b),
                _ => Value::Null,
            },
            BinaryOp::Eq => compare(|o| o == Ordering::Equal),
            BinaryOp::Ne => compare(|o| o != Ordering::Equal),
            BinaryOp::Lt => compare(|o| o == Ordering::Less),
            BinaryOp::Le => compare(|o| o != Ordering::Greater),
            BinaryOp::Gt => compare(|o| o == Ordering::Greater),
            BinaryOp::Ge => compare(|o| o != Ordering::Less),
            BinaryOp::Concat => {
                let text = |v: &Value| match v {
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                Value::from(format!("{}{}", text(&l), text(&r)))
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                let truth = |v: &Value| {
                    v.truthy().map_err(|e| {
                        OlapError::eval(format!("expected a logical value, got {}", e.actual))
                    })
                };
                let (a, b) = (truth(&l)?, truth(&r)?);
                Value::Boolean(match op {
                    BinaryOp::And => a && b,
                    BinaryOp::Or => a || b,
                    _ => a ^ b,
                })
            }
        })
    }

    fn property(&mut self, prop: MemberProperty, object: &Calc) -> OlapResult<Value> {
        let catalog = self.catalog;
        let schema = catalog.schema;
        Ok(match object.ty.category() {
            Category::Member => {
                let m = self.eval_member(object)?;
                match prop {
                    MemberProperty::Name => Value::from(catalog.name(m)),
                    MemberProperty::UniqueName => Value::from(catalog.unique_name(m)),
                    MemberProperty::Ordinal => Value::from(catalog.ordinal(m)),
                }
            }
            Category::Level => {
                let level = schema.level(self.eval_level(object)?);
                match prop {
                    MemberProperty::Name => Value::from(level.name.as_str()),
                    MemberProperty::UniqueName => Value::from(level.unique_name.as_str()),
                    MemberProperty::Ordinal => Value::from(i64::from(level.depth)),
                }
            }
            Category::Hierarchy => {
                let h = schema.hierarchy(self.eval_hierarchy(object)?);
                match prop {
                    MemberProperty::Name => Value::from(h.name.as_str()),
                    MemberProperty::UniqueName => Value::from(h.unique_name.as_str()),
                    MemberProperty::Ordinal => {
                        return Err(OlapError::eval("hierarchies have no ordinal"))
                    }
                }
            }
            Category::Dimension => {
                let d = schema.dimension(self.eval_dimension(object)?);
                match prop {
                    MemberProperty::Name => Value::from(d.name.as_str()),
                    MemberProperty::UniqueName => Value::from(d.unique_name.as_str()),
                    MemberProperty::Ordinal => {
                        return Err(OlapError::eval("dimensions have no ordinal"))
                    }
                }
            }
            other => return Err(OlapError::eval(format!("{other} has no properties"))),
        })
    }

    fn set_aggregate(
        &mut self,
        func: SetAggregate,
        set: &Calc,
        value: Option<&Calc>,
    ) -> OlapResult<Value> {
        let func = match func {
            SetAggregate::Aggregate => self.measure_rollup()?,
            other => other,
        };
        let tuples = self.eval_list(set)?;
        let mut numbers = Vec::with_capacity(tuples.len());
        for tuple in &tuples {
            self.handle.check()?;
            let v = self.scoped(|ev| {
                ev.set_tuple(tuple)?;
                match value {
                    Some(value) => ev.eval_scalar(value),
                    None => ev.cell_value(),
                }
            })?;
            match v {
                Value::Null => {}
                other => numbers.push(other.as_f64().ok_or_else(|| {
                    OlapError::eval(format!("cannot aggregate non-numeric value {other}"))
                })?),
            }
        }
        if numbers.is_empty() {
            return Ok(Value::Null);
        }
        Ok(Value::from(match func {
            SetAggregate::Sum | SetAggregate::Aggregate => numbers.iter().sum(),
            SetAggregate::Avg => numbers.iter().sum::<f64>() / numbers.len() as f64,
            SetAggregate::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
            SetAggregate::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }))
    }

    /// How `Aggregate` combines values of the current measure.
    fn measure_rollup(&self) -> OlapResult<SetAggregate> {
        let schema = self.catalog.schema;
        let measures = schema.measures_hierarchy(self.ctx.cube());
        let current = self.ctx.get(measures)?;
        let Some(measure) = schema.member(current).and_then(|m| m.measure) else {
            return Ok(SetAggregate::Sum);
        };
        Ok(match schema.measure(measure).aggregator {
            Aggregator::Sum | Aggregator::Count => SetAggregate::Sum,
            Aggregator::Min => SetAggregate::Min,
            Aggregator::Max => SetAggregate::Max,
            Aggregator::Avg => SetAggregate::Avg,
            Aggregator::DistinctCount => {
                return Err(OlapError::eval(format!(
                    "Aggregate cannot combine distinct counts of {}",
                    schema.measure(measure).name
                )))
            }
        })
    }

    pub fn eval_member(&mut self, calc: &Calc) -> OlapResult<MemberId> {
        use CalcKind as K;
        let catalog = self.catalog;
        match &calc.kind {
            K::Member(m) => Ok(*m),
            K::CurrentMember(h) => self.ctx.get(*h),
            K::DynamicCurrentMember(hierarchy) => {
                let h = self.eval_hierarchy(hierarchy)?;
                self.ctx.get(h)
            }
            K::DefaultMember(hierarchy) => {
                let h = self.eval_hierarchy(hierarchy)?;
                Ok(catalog.default_member(h))
            }
            K::Navigate { nav, member } => {
                let m = self.eval_member(member)?;
                if catalog.is_null(m) {
                    return Ok(m);
                }
                let found = match nav {
                    Navigation::Parent => catalog.parent(m),
                    Navigation::FirstChild => catalog.children(m).first().copied(),
                    Navigation::LastChild => catalog.children(m).last().copied(),
                    Navigation::PrevMember => catalog.schema.member_at_offset(m, -1),
                    Navigation::NextMember => catalog.schema.member_at_offset(m, 1),
                };
                found.map_or_else(|| self.null_member_of(m), Ok)
            }
            K::Lag {
                member,
                offset,
                negate,
            } => {
                let m = self.eval_member(member)?;
                let n = self
                    .number(offset)?
                    .ok_or_else(|| OlapError::eval("Lag offset is empty"))? as i64;
                if catalog.is_null(m) {
                    return Ok(m);
                }
                let delta = if *negate { n } else { -n };
                match catalog.schema.member_at_offset(m, delta) {
                    Some(found) => Ok(found),
                    None => self.null_member_of(m),
                }
            }
            K::Ancestor { member, level } => {
                let m = self.eval_member(member)?;
                let level = self.eval_level(level)?;
                let start = if catalog.is_calculated(m) {
                    catalog.parent(m)
                } else {
                    Some(m)
                };
                match start.and_then(|s| catalog.schema.ancestor_at_level(s, level)) {
                    Some(found) => Ok(found),
                    None => self.null_member_of(m),
                }
            }
            K::IIf {
                cond,
                then,
                otherwise,
            } => {
                if self.truthy(cond)? {
                    self.eval_member(then)
                } else {
                    self.eval_member(otherwise)
                }
            }
            K::Item { set, index } => {
                let i = self.number(index)?;
                match set.ty.category() {
                    Category::Tuple => {
                        let tuple = self.eval_tuple(set)?;
                        i.filter(|i| *i >= 0.0)
                            .and_then(|i| tuple.get(i as usize).copied())
                            .ok_or_else(|| OlapError::eval("tuple index out of range"))
                    }
                    _ => {
                        let tuples = self.eval_list(set)?;
                        if let Some(m) = i
                            .filter(|i| *i >= 0.0)
                            .and_then(|i| tuples.get(i as usize))
                            .and_then(|t| t.first().copied())
                        {
                            return Ok(m);
                        }
                        match calc.ty.hierarchies().first().copied().flatten() {
                            Some(h) => Ok(catalog.null_member(h)),
                            None => Err(OlapError::eval("set index out of range")),
                        }
                    }
                }
            }
            _ => Err(OlapError::eval(format!("{} is not a member expression", calc.ty))),
        }
    }

    pub fn eval_tuple(&mut self, calc: &Calc) -> OlapResult<Tuple> {
        if calc.ty.category() == Category::Member {
            return Ok(std::iter::once(self.eval_member(calc)?).collect());
        }
        match &calc.kind {
            CalcKind::Tuple(items) => {
                let mut tuple = Tuple::new();
                for item in items {
                    match item.ty.category() {
                        Category::Member => tuple.push(self.eval_member(item)?),
                        _ => tuple.extend(self.eval_tuple(item)?),
                    }
                }
                Ok(tuple)
            }
            CalcKind::Item { set, index } => {
                let tuples = self.eval_list(set)?;
                let i = self.number(index)?;
                Ok(i.filter(|i| *i >= 0.0)
                    .and_then(|i| tuples.get(i as usize).cloned())
                    .unwrap_or_default())
            }
            CalcKind::IIf {
                cond,
                then,
                otherwise,
            } => {
                if self.truthy(cond)? {
                    self.eval_tuple(then)
                } else {
                    self.eval_tuple(otherwise)
                }
            }
            _ => Err(OlapError::eval(format!("{} is not a tuple expression", calc.ty))),
        }
    }

    pub fn eval_level(&mut self, calc: &Calc) -> OlapResult<LevelId> {
        match &calc.kind {
            CalcKind::Level(l) => Ok(*l),
            CalcKind::LevelOf(member) => {
                let m = self.eval_member(member)?;
                self.catalog
                    .level_of(m)
                    .ok_or_else(|| OlapError::eval(format!("member {m} no longer exists")))
            }
            _ => Err(OlapError::eval(format!("{} is not a level expression", calc.ty))),
        }
    }

    pub fn eval_hierarchy(&mut self, calc: &Calc) -> OlapResult<HierarchyId> {
        let schema = self.catalog.schema;
        match &calc.kind {
            CalcKind::Hierarchy(h) => Ok(*h),
            CalcKind::HierarchyOf(object) => match object.ty.category() {
                Category::Level => Ok(schema.level(self.eval_level(object)?).hierarchy),
                _ => {
                    let m = self.eval_member(object)?;
                    self.catalog
                        .hierarchy_of(m)
                        .ok_or_else(|| OlapError::eval(format!("member {m} no longer exists")))
                }
            },
            CalcKind::DimensionHierarchy(dimension) => {
                let d = self.eval_dimension(dimension)?;
                schema
                    .dimension(d)
                    .hierarchies
                    .first()
                    .copied()
                    .ok_or_else(|| OlapError::eval(format!("dimension {d} has no hierarchy")))
            }
            _ => Err(OlapError::eval(format!("{} is not a hierarchy expression", calc.ty))),
        }
    }

    pub fn eval_dimension(&mut self, calc: &Calc) -> OlapResult<DimensionId> {
        let schema = self.catalog.schema;
        match &calc.kind {
            CalcKind::Dimension(d) => Ok(*d),
            CalcKind::DimensionOf(object) => match object.ty.category() {
                Category::Level => {
                    let l = self.eval_level(object)?;
                    Ok(schema.hierarchy(schema.level(l).hierarchy).dimension)
                }
                Category::Hierarchy => Ok(schema.hierarchy(self.eval_hierarchy(object)?).dimension),
                _ => {
                    let m = self.eval_member(object)?;
                    self.catalog
                        .dimension_of(m)
                        .ok_or_else(|| OlapError::eval(format!("member {m} no longer exists")))
                }
            },
            _ => Err(OlapError::eval(format!("{} is not a dimension expression", calc.ty))),
        }
    }

    /// Evaluate a set expression to its tuples, in order.
    pub fn eval_list(&mut self, calc: &Calc) -> OlapResult<Vec<Tuple>> {
        use CalcKind as K;
        let catalog = self.catalog;
        let schema = catalog.schema;
        let singles = |members: &[MemberId]| -> Vec<Tuple> {
            members.iter().map(|m| std::iter::once(*m).collect()).collect()
        };
        match calc.ty.category() {
            Category::Member | Category::Tuple => return Ok(vec![self.eval_tuple(calc)?]),
            _ => {}
        }
        match &calc.kind {
            K::ToSet(item) => Ok(vec![self.eval_tuple(item)?]),
            K::SetLiteral(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(self.eval_list(item)?);
                }
                Ok(out)
            }
            K::Members(object) => match object.ty.category() {
                Category::Level => {
                    let level = self.eval_level(object)?;
                    Ok(singles(&schema.level(level).members))
                }
                _ => {
                    let h = self.eval_hierarchy(object)?;
                    Ok(singles(&schema.hierarchy_members(h)))
                }
            },
            K::Children(member) => {
                let m = self.eval_member(member)?;
                Ok(singles(catalog.children(m)))
            }
            K::Siblings(member) => {
                let m = self.eval_member(member)?;
                match catalog.parent(m) {
                    Some(parent) => Ok(singles(catalog.children(parent))),
                    None => match schema.member(m) {
                        Some(stored) => Ok(singles(&schema.level(stored.level).members)),
                        None => Ok(vec![std::iter::once(m).collect()]),
                    },
                }
            }
            K::Descendants { member, level } => {
                let m = self.eval_member(member)?;
                let level = self.eval_level(level)?;
                Ok(singles(&schema.descendants_at_level(m, level)))
            }
            K::CrossJoin(left, right) => {
                let left = self.eval_list(left)?;
                let right = self.eval_list(right)?;
                let mut out = Vec::with_capacity(left.len() * right.len());
                for l in &left {
                    self.handle.check()?;
                    for r in &right {
                        let mut tuple = l.clone();
                        tuple.extend(r.iter().copied());
                        out.push(tuple);
                    }
                }
                Ok(out)
            }
            K::Filter { set, cond } => {
                let tuples = self.eval_list(set)?;
                let mut out = Vec::new();
                for tuple in tuples {
                    self.handle.check()?;
                    let keep = self.scoped(|ev| {
                        ev.set_tuple(&tuple)?;
                        ev.truthy(cond)
                    })?;
                    if keep {
                        out.push(tuple);
                    }
                }
                Ok(out)
            }
            K::Order {
                set,
                key,
                ascending,
                breaking,
            } => self.order(set, key, *ascending, *breaking),
            K::Head {
                set,
                count,
                from_end,
            } => {
                let mut tuples = self.eval_list(set)?;
                let n = self.count(count)?.min(tuples.len());
                Ok(if *from_end {
                    tuples.split_off(tuples.len() - n)
                } else {
                    tuples.truncate(n);
                    tuples
                })
            }
            K::TopCount {
                set,
                count,
                value,
                top,
            } => self.top_count(set, count, value.as_deref(), *top),
            K::Combine { op, left, right } => {
                let left = self.eval_list(left)?;
                let right = self.eval_list(right)?;
                Ok(match op {
                    SetCombine::Union { all: true } => left.into_iter().chain(right).collect(),
                    SetCombine::Union { all: false } => {
                        distinct(left.into_iter().chain(right).collect())
                    }
                    SetCombine::Except => {
                        let remove: AHashSet<&Tuple> = right.iter().collect();
                        distinct(left.into_iter().filter(|t| !remove.contains(t)).collect())
                    }
                    SetCombine::Intersect => {
                        let keep: AHashSet<&Tuple> = right.iter().collect();
                        distinct(left.into_iter().filter(|t| keep.contains(t)).collect())
                    }
                })
            }
            K::Distinct(set) => Ok(distinct(self.eval_list(set)?)),
            K::Generate { source, body, all } => {
                let tuples = self.eval_list(source)?;
                let mut out = Vec::new();
                for tuple in &tuples {
                    self.handle.check()?;
                    let generated = self.scoped(|ev| {
                        ev.set_tuple(tuple)?;
                        ev.eval_list(body)
                    })?;
                    out.extend(generated);
                }
                Ok(if *all { out } else { distinct(out) })
            }
            K::Hierarchize(set) => {
                let tuples = self.eval_list(set)?;
                let mut keyed: Vec<(Vec<Vec<i64>>, Tuple)> = tuples
                    .into_iter()
                    .map(|t| (t.iter().map(|m| catalog.hierarchy_path(*m)).collect(), t))
                    .collect();
                keyed.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(keyed.into_iter().map(|(_, t)| t).collect())
            }
            K::Exists { set, filter } => self.exists(calc, set, filter),
            K::NonEmpty { set, filter } => {
                let tuples = self.eval_list(set)?;
                let filters = match filter {
                    Some(filter) => self.eval_list(filter)?,
                    None => vec![Tuple::new()],
                };
                let mut out = Vec::new();
                for tuple in tuples {
                    self.handle.check()?;
                    let mut non_empty = false;
                    for f in &filters {
                        let value = self.scoped(|ev| {
                            ev.set_tuple(&tuple)?;
                            ev.set_tuple(f)?;
                            ev.cell_value()
                        })?;
                        if !value.is_null() {
                            non_empty = true;
                            break;
                        }
                    }
                    if non_empty {
                        out.push(tuple);
                    }
                }
                Ok(out)
            }
            K::Extract { set, positions } => {
                let tuples = self.eval_list(set)?;
                Ok(distinct(
                    tuples
                        .iter()
                        .map(|t| positions.iter().filter_map(|p| t.get(*p).copied()).collect())
                        .collect(),
                ))
            }
            K::IIf {
                cond,
                then,
                otherwise,
            } => {
                if self.truthy(cond)? {
                    self.eval_list(then)
                } else {
                    self.eval_list(otherwise)
                }
            }
            _ => Err(OlapError::eval(format!("{} is not a set expression", calc.ty))),
        }
    }

    /// Values of `value` (or of the cell) at each tuple of `tuples`.
    fn values_at(&mut self, tuples: &[Tuple], value: Option<&Calc>) -> OlapResult<Vec<Value>> {
        let mut out = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            self.handle.check()?;
            out.push(self.scoped(|ev| {
                ev.set_tuple(tuple)?;
                match value {
                    Some(value) => ev.eval_scalar(value),
                    None => ev.cell_value(),
                }
            })?);
        }
        Ok(out)
    }

    fn order(
        &mut self,
        set: &Calc,
        key: &Calc,
        ascending: bool,
        breaking: bool,
    ) -> OlapResult<Vec<Tuple>> {
        let tuples = self.eval_list(set)?;
        let values = self.values_at(&tuples, Some(key))?;
        let catalog = self.catalog;
        let mut keyed: Vec<(Vec<i64>, Value, Tuple)> = tuples
            .into_iter()
            .zip(values)
            .map(|(t, v)| {
                let group = match (breaking, t.first().and_then(|m| catalog.parent(*m))) {
                    (false, Some(parent)) => catalog.hierarchy_path(parent),
                    _ => Vec::new(),
                };
                (group, v, t)
            })
            .collect();
        keyed.sort_by(|a, b| {
            let by_value = cmp_values(&a.1, &b.1);
            a.0.cmp(&b.0).then(if ascending {
                by_value
            } else {
                by_value.reverse()
            })
        });
        Ok(keyed.into_iter().map(|(_, _, t)| t).collect())
    }

    fn top_count(
        &mut self,
        set: &Calc,
        count: &Calc,
        value: Option<&Calc>,
        top: bool,
    ) -> OlapResult<Vec<Tuple>> {
        let tuples = self.eval_list(set)?;
        let n = self.count(count)?;
        let values = self.values_at(&tuples, value)?;
        let mut keyed: Vec<(Value, Tuple)> = values.into_iter().zip(tuples).collect();
        keyed.sort_by(|a, b| match (a.0.is_null(), b.0.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ordering = cmp_values(&a.0, &b.0);
                if top {
                    ordering.reverse()
                } else {
                    ordering
                }
            }
        });
        Ok(keyed.into_iter().take(n).map(|(_, t)| t).collect())
    }

    fn exists(&mut self, node: &Calc, set: &Calc, filter: &Calc) -> OlapResult<Vec<Tuple>> {
        let tuples = self.eval_list(set)?;
        let Some(first) = tuples.first() else {
            return Ok(tuples);
        };
        let catalog = self.catalog;
        let set_hierarchies: Vec<Option<HierarchyId>> =
            first.iter().map(|m| catalog.hierarchy_of(*m)).collect();

        let key = (node.address(), self.ctx.project(&filter.deps));
        let cached = self
            .memo
            .exists
            .get(&key)
            .filter(|index| index.set_hierarchies == set_hierarchies)
            .cloned();
        let index = match cached {
            Some(index) => index,
            None => {
                let filter_tuples = self.eval_list(filter)?;
                let index = Rc::new(ExistsIndex::build(catalog, filter_tuples, set_hierarchies));
                log::trace!("built exists index with {} bucket(s)", index.buckets.len());
                self.memo.exists.insert(key, Rc::clone(&index));
                index
            }
        };
        let mut out = Vec::new();
        for tuple in tuples {
            self.handle.check()?;
            if index.matches(catalog, &tuple) {
                out.push(tuple);
            }
        }
        Ok(out)
    }
}

/// Drop repeated tuples, keeping first occurrences.
fn distinct(mut tuples: Vec<Tuple>) -> Vec<Tuple> {
    let mut seen = AHashSet::with_capacity(tuples.len());
    tuples.retain(|t| seen.insert(t.clone()));
    tuples
}

/// Filter tuples of an `Exists`, bucketed by the top-level ancestors of their members on the
/// hierarchies they share with the tested set.
pub struct ExistsIndex {
    set_hierarchies: Vec<Option<HierarchyId>>,
    /// (position in the set tuple, position in the filter tuple) per shared hierarchy.
    shared: Vec<(usize, usize)>,
    buckets: AHashMap<Tuple, Vec<Tuple>>,
    /// Filter tuples holding an All member on a shared hierarchy; they match any bucket.
    wildcard: Vec<Tuple>,
    all: Vec<Tuple>,
}

fn top_ancestor(catalog: MemberCatalog<'_>, member: MemberId) -> MemberId {
    let mut current = member;
    while let Some(parent) = catalog.parent(current) {
        if catalog.is_all(parent) {
            break;
        }
        current = parent;
    }
    current
}

impl ExistsIndex {
    fn build(
        catalog: MemberCatalog<'_>,
        filter: Vec<Tuple>,
        set_hierarchies: Vec<Option<HierarchyId>>,
    ) -> Self {
        let shared: Vec<(usize, usize)> = match filter.first() {
            Some(f) => set_hierarchies
                .iter()
                .enumerate()
                .filter_map(|(sp, h)| {
                    let h = (*h)?;
                    let fp = f.iter().position(|m| catalog.hierarchy_of(*m) == Some(h))?;
                    Some((sp, fp))
                })
                .collect(),
            None => Vec::new(),
        };
        let mut buckets: AHashMap<Tuple, Vec<Tuple>> = AHashMap::new();
        let mut wildcard = Vec::new();
        for f in &filter {
            let positions: Option<Vec<MemberId>> =
                shared.iter().map(|(_, fp)| f.get(*fp).copied()).collect();
            let Some(members) = positions else {
                continue;
            };
            if members.iter().any(|m| catalog.is_all(*m)) {
                wildcard.push(f.clone());
            } else {
                let key = members.iter().map(|m| top_ancestor(catalog, *m)).collect();
                buckets.entry(key).or_default().push(f.clone());
            }
        }
        Self {
            set_hierarchies,
            shared,
            buckets,
            wildcard,
            all: filter,
        }
    }

    fn related(&self, catalog: MemberCatalog<'_>, tuple: &Tuple, f: &Tuple) -> bool {
        self.shared.iter().all(|(sp, fp)| match (tuple.get(*sp), f.get(*fp)) {
            (Some(a), Some(b)) => catalog.related(*a, *b),
            _ => false,
        })
    }

    fn matches(&self, catalog: MemberCatalog<'_>, tuple: &Tuple) -> bool {
        if self.all.is_empty() {
            return false;
        }
        if self.shared.is_empty() {
            return true;
        }
        let members: Option<Vec<MemberId>> =
            self.shared.iter().map(|(sp, _)| tuple.get(*sp).copied()).collect();
        let Some(members) = members else {
            return false;
        };
        if members.iter().any(|m| catalog.is_all(*m)) {
            return self.all.iter().any(|f| self.related(catalog, tuple, f));
        }
        let key: Tuple = members.iter().map(|m| top_ancestor(catalog, *m)).collect();
        self.buckets
            .get(&key)
            .into_iter()
            .flatten()
            .chain(&self.wildcard)
            .any(|f| self.related(catalog, tuple, f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use olap_model::test_support::{food_mart, FoodMartIds};
    use olap_model::Schema;
    use pretty_assertions::assert_eq;

    use crate::ast::Exp;
    use crate::compiler::Compiler;
    use crate::members::CalculatedMembers;

    /// Serves every cell as the year key plus the quarter number, so results can be checked
    /// without a backend. Cells of `fail_on` quarters fail.
    struct KeyCells {
        fail_on: Option<&'static str>,
    }

    impl CellReader for KeyCells {
        fn read(
            &mut self,
            request: &CellRequest,
            handle: &ExecutionHandle,
        ) -> OlapResult<CellLookup> {
            handle.check()?;
            let mut total = 0.0;
            for (_, value) in &request.constraints {
                total += match value {
                    Value::Number(n) => n.0,
                    Value::Text(s) => {
                        if self.fail_on == Some(s.as_ref()) {
                            return Err(OlapError::eval(format!("cell {request} is unreadable")));
                        }
                        s.trim_start_matches('Q').parse().unwrap_or(0.0)
                    }
                    _ => 0.0,
                };
            }
            Ok(CellLookup::Ready(Value::from(total)))
        }
    }

    fn compile(schema: &Schema, ids: &FoodMartIds, exp: &Exp, expected: Category) -> Calc {
        let config = EngineConfig::default();
        Compiler::new(schema, ids.cube, &config)
            .compile_as(exp, expected)
            .unwrap()
    }

    fn run<T>(
        schema: &Schema,
        ids: &FoodMartIds,
        fail_on: Option<&'static str>,
        f: impl FnOnce(&mut Evaluator<'_>) -> T,
    ) -> T {
        let overlay = CalculatedMembers::default();
        let config = EngineConfig::default();
        let handle = ExecutionHandle::new();
        let mut cells = KeyCells { fail_on };
        let mut ev = Evaluator::new(
            MemberCatalog::new(schema, &overlay),
            EvalContext::new(schema, ids.cube),
            &mut cells,
            &handle,
            &config,
        );
        f(&mut ev)
    }

    fn singles(members: &[MemberId]) -> Vec<Tuple> {
        members.iter().map(|m| std::iter::once(*m).collect()).collect()
    }

    #[test]
    fn cell_at_a_member_leaves_the_context_alone() {
        let (schema, ids) = food_mart();
        let calc = compile(&schema, &ids, &Exp::name("[Time].[1997].[Q3]"), Category::Numeric);
        run(&schema, &ids, None, |ev| {
            let before = ev.context().members().to_vec();
            assert_eq!(ev.eval_scalar(&calc), Ok(Value::from(2000.0)));
            assert_eq!(ev.context().members(), before.as_slice());
        });
    }

    #[test]
    fn failed_iteration_restores_the_context() {
        let (schema, ids) = food_mart();
        let exp = Exp::function(
            "Filter",
            vec![
                Exp::name("[Time].[Quarter]").property("Members"),
                Exp::name("[Measures].[Unit Sales]").infix(">", Exp::number(0.0)),
            ],
        );
        let calc = compile(&schema, &ids, &exp, Category::Set);
        run(&schema, &ids, Some("Q2"), |ev| {
            let before = ev.context().members().to_vec();
            assert!(ev.eval_list(&calc).is_err());
            assert_eq!(ev.context().members(), before.as_slice());
        });
    }

    #[test]
    fn hierarchical_order_puts_parents_first() {
        let (schema, ids) = food_mart();
        let exp = Exp::function(
            "Order",
            vec![
                Exp::set(vec![
                    Exp::name("[Time].[1997].[Q1]"),
                    Exp::name("[Time].[1997]"),
                    Exp::name("[Time].[1997].[Q2]"),
                ]),
                Exp::name("[Measures].[Unit Sales]"),
                Exp::name("DESC"),
            ],
        );
        let calc = compile(&schema, &ids, &exp, Category::Set);
        let ordered = run(&schema, &ids, None, |ev| ev.eval_list(&calc)).unwrap();
        assert_eq!(ordered, singles(&[ids.y1997, ids.q2_1997, ids.q1_1997]));
    }

    #[test]
    fn top_count_ranks_by_value() {
        let (schema, ids) = food_mart();
        let exp = Exp::function(
            "TopCount",
            vec![
                Exp::name("[Time].[Quarter]").property("Members"),
                Exp::number(2.0),
                Exp::name("[Measures].[Unit Sales]"),
            ],
        );
        let calc = compile(&schema, &ids, &exp, Category::Set);
        let top = run(&schema, &ids, None, |ev| ev.eval_list(&calc)).unwrap();
        assert_eq!(top, singles(&[ids.q4_1997, ids.q3_1997]));
    }

    #[test]
    fn exists_keeps_related_tuples() {
        let (schema, ids) = food_mart();
        let exp = Exp::function(
            "Exists",
            vec![
                Exp::name("[Time].[Quarter]").property("Members"),
                Exp::set(vec![Exp::name("[Time].[1998]")]),
            ],
        );
        let calc = compile(&schema, &ids, &exp, Category::Set);
        let (kept, memo) = run(&schema, &ids, None, |ev| {
            let kept = ev.eval_list(&calc);
            let again = ev.eval_list(&calc);
            assert_eq!(kept, again);
            (kept, ev.memo.len())
        });
        assert_eq!(kept.unwrap(), singles(&[ids.q1_1998, ids.q2_1998]));
        assert_eq!(memo, 1);
    }

    #[test]
    fn union_and_except_drop_duplicates() {
        let (schema, ids) = food_mart();
        let quarters = Exp::name("[Time].[1997]").property("Children");
        let union = Exp::function(
            "Union",
            vec![
                Exp::set(vec![Exp::name("[Time].[1997].[Q2]")]),
                quarters.clone(),
            ],
        );
        let except = Exp::function(
            "Except",
            vec![quarters, Exp::set(vec![Exp::name("[Time].[1997].[Q1]")])],
        );
        let union = compile(&schema, &ids, &union, Category::Set);
        let except = compile(&schema, &ids, &except, Category::Set);
        run(&schema, &ids, None, |ev| {
            assert_eq!(
                ev.eval_list(&union).unwrap(),
                singles(&[ids.q2_1997, ids.q1_1997, ids.q3_1997, ids.q4_1997])
            );
            assert_eq!(
                ev.eval_list(&except).unwrap(),
                singles(&[ids.q2_1997, ids.q3_1997, ids.q4_1997])
            );
        });
    }

    #[test]
    fn null_arithmetic() {
        let (schema, ids) = food_mart();
        let eval = |exp: Exp| {
            let calc = compile(&schema, &ids, &exp, Category::Value);
            run(&schema, &ids, None, |ev| ev.eval_scalar(&calc)).unwrap()
        };
        assert_eq!(eval(Exp::Null.infix("+", Exp::number(2.0))), Value::from(2.0));
        assert_eq!(eval(Exp::Null.infix("*", Exp::number(2.0))), Value::Null);
        assert_eq!(eval(Exp::number(1.0).infix("/", Exp::number(0.0))), Value::Null);
        assert_eq!(
            eval(Exp::Null.infix("<", Exp::number(2.0))),
            Value::Boolean(false)
        );
    }

    #[test]
    fn navigation_runs_off_into_the_null_member() {
        let (schema, ids) = food_mart();
        let prev = compile(
            &schema,
            &ids,
            &Exp::name("[Time].[1997]").property("PrevMember"),
            Category::Member,
        );
        let lead = compile(
            &schema,
            &ids,
            &Exp::name("[Time].[1997]").method("Lead", vec![Exp::number(1.0)]),
            Category::Member,
        );
        let null = schema.hierarchy(ids.time).null_member;
        run(&schema, &ids, None, |ev| {
            assert_eq!(ev.eval_member(&prev), Ok(null));
            assert_eq!(ev.eval_member(&lead), Ok(ids.y1998));
        });
    }

    #[test]
    fn tuple_items_are_counted_from_zero() {
        let (schema, ids) = food_mart();
        let tuple = Exp::tuple(vec![Exp::name("[Time].[1997]"), Exp::name("[Store].[USA]")]);
        let item = |i: f64| {
            let exp = tuple.clone().method("Item", vec![Exp::number(i)]);
            let calc = compile(&schema, &ids, &exp, Category::Member);
            run(&schema, &ids, None, |ev| ev.eval_member(&calc))
        };
        assert_eq!(item(0.0), Ok(ids.y1997));
        assert_eq!(item(1.0), Ok(ids.usa));
        assert!(item(-1.0).is_err());
        assert!(item(2.0).is_err());
    }

    #[test]
    fn cells_at_the_null_member_are_empty() {
        let (schema, ids) = food_mart();
        let exp = Exp::name("[Time].[1997]").property("PrevMember");
        let calc = compile(&schema, &ids, &exp, Category::Numeric);
        let value = run(&schema, &ids, None, |ev| ev.eval_scalar(&calc));
        assert_eq!(value, Ok(Value::Null));
    }
}
