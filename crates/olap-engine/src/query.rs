//! Query submission types and results.
use olap_model::{CubeId, HierarchyId, Value};

use crate::ast::Exp;
use crate::calc::{Calc, Tuple};
use crate::members::CalculatedMembers;

/// `WITH MEMBER` definition.
#[derive(Clone, Debug, PartialEq)]
pub struct CalculatedMemberDef {
    /// Unique name of the hierarchy the member belongs to, e.g. `[Measures]`.
    pub hierarchy: String,
    pub name: String,
    /// Unique name of the parent member; defaults to the hierarchy's All member.
    pub parent: Option<String>,
    pub formula: Exp,
    pub solve_order: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AxisSpec {
    pub expression: Exp,
    /// Drop positions whose cells are all empty.
    pub non_empty: bool,
}

/// A query as handed over by the parser.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub cube: String,
    pub calculated_members: Vec<CalculatedMemberDef>,
    pub axes: Vec<AxisSpec>,
    pub slicer: Option<Exp>,
}

impl Query {
    pub fn new(cube: impl Into<String>) -> Self {
        Self {
            cube: cube.into(),
            calculated_members: Vec::new(),
            axes: Vec::new(),
            slicer: None,
        }
    }

    pub fn with_member(
        mut self,
        hierarchy: &str,
        name: &str,
        formula: Exp,
        solve_order: i32,
    ) -> Self {
        self.calculated_members.push(CalculatedMemberDef {
            hierarchy: hierarchy.to_string(),
            name: name.to_string(),
            parent: None,
            formula,
            solve_order,
        });
        self
    }

    pub fn on_axis(mut self, expression: Exp) -> Self {
        self.axes.push(AxisSpec {
            expression,
            non_empty: false,
        });
        self
    }

    pub fn on_non_empty_axis(mut self, expression: Exp) -> Self {
        self.axes.push(AxisSpec {
            expression,
            non_empty: true,
        });
        self
    }

    pub fn with_slicer(mut self, slicer: Exp) -> Self {
        self.slicer = Some(slicer);
        self
    }
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledAxis {
    pub(crate) set: Calc,
    pub(crate) non_empty: bool,
}

/// Immutable result of [`crate::Session::compile`]; may be executed any number of times.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    pub(crate) cube: CubeId,
    pub(crate) overlay: CalculatedMembers,
    pub(crate) axes: Vec<CompiledAxis>,
    pub(crate) slicer: Option<Calc>,
}

impl CompiledQuery {
    pub fn cube(&self) -> CubeId {
        self.cube
    }

    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    /// Hierarchies of each axis, as known statically.
    pub fn axis_hierarchies(&self, axis: usize) -> Vec<Option<HierarchyId>> {
        self.axes
            .get(axis)
            .map_or_else(Vec::new, |a| a.set.ty.hierarchies())
    }

    pub fn calculated_members(&self) -> &CalculatedMembers {
        &self.overlay
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Position {
    pub members: Tuple,
    pub unique_names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Axis {
    pub positions: Vec<Position>,
}

impl Axis {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn member_names(&self) -> Vec<Vec<&str>> {
        self.positions
            .iter()
            .map(|p| p.unique_names.iter().map(String::as_str).collect())
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cell {
    pub value: Value,
    /// Set when the cell failed to evaluate; `value` is then null.
    pub error: Option<String>,
}

impl Cell {
    pub fn value(value: Value) -> Self {
        Self { value, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            value: Value::Null,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.error.is_none() && self.value.is_null()
    }
}

/// Query result. Cells are stored with the first axis varying fastest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellSet {
    pub axes: Vec<Axis>,
    pub cells: Vec<Cell>,
}

impl CellSet {
    /// Offset of `coords` in `cells`, or `None` when out of range.
    pub fn ordinal(&self, coords: &[usize]) -> Option<usize> {
        if coords.len() != self.axes.len() {
            return None;
        }
        let mut ordinal = 0;
        let mut stride = 1;
        for (coord, axis) in coords.iter().zip(&self.axes) {
            if *coord >= axis.len() {
                return None;
            }
            ordinal += coord * stride;
            stride *= axis.len();
        }
        Some(ordinal)
    }

    pub fn cell(&self, coords: &[usize]) -> Option<&Cell> {
        self.ordinal(coords).and_then(|i| self.cells.get(i))
    }

    /// Cell values in storage order, errors as null.
    pub fn values(&self) -> Vec<Value> {
        self.cells.iter().map(|c| c.value.clone()).collect()
    }
}
