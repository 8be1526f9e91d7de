//! Static expression types and the implicit conversions between them.
use std::fmt;

use olap_model::HierarchyId;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Numeric,
    String,
    Logical,
    /// Member of a hierarchy, when known statically.
    Member(Option<HierarchyId>),
    Tuple(Vec<Option<HierarchyId>>),
    /// Element type is `Member`, `Tuple` or `Empty` (the empty set literal).
    Set(Box<Type>),
    Level(Option<HierarchyId>),
    Hierarchy(Option<HierarchyId>),
    Dimension,
    /// Type of the `NULL` literal.
    Null,
    /// Element type of `{}`.
    Empty,
}

/// Coarse classification used for overload resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Numeric,
    String,
    Logical,
    /// Any scalar.
    Value,
    Member,
    Tuple,
    Set,
    Level,
    Hierarchy,
    Dimension,
    Null,
    Empty,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::Numeric => "<Numeric>",
            Category::String => "<String>",
            Category::Logical => "<Logical>",
            Category::Value => "<Value>",
            Category::Member => "<Member>",
            Category::Tuple => "<Tuple>",
            Category::Set => "<Set>",
            Category::Level => "<Level>",
            Category::Hierarchy => "<Hierarchy>",
            Category::Dimension => "<Dimension>",
            Category::Null => "<Null>",
            Category::Empty => "<Empty>",
        }
    }

    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            Category::Numeric | Category::String | Category::Logical | Category::Value
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How an argument of one category is adapted to a parameter of another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conversion {
    None,
    NullToScalar,
    MemberToTuple,
    /// Read the cell at the member or tuple.
    CellValue,
    ToSet,
    NumericToString,
    /// Hierarchy used where a member is expected means its current member.
    CurrentMember,
    DimensionToHierarchy,
}

/// Cost of converting `from` into `to`, lower is better; `None` when not convertible.
pub fn conversion(from: Category, to: Category) -> Option<(u32, Conversion)> {
    use Category as C;
    if from == to {
        return Some((0, Conversion::None));
    }
    Some(match (from, to) {
        (C::Numeric | C::String | C::Logical, C::Value) => (0, Conversion::None),
        (C::Empty, C::Set) => (0, Conversion::None),
        (C::Null, C::Numeric | C::String | C::Logical | C::Value) => {
            (1, Conversion::NullToScalar)
        }
        (C::Member, C::Tuple) => (1, Conversion::MemberToTuple),
        (C::Numeric, C::String) => (1, Conversion::NumericToString),
        (C::Member | C::Tuple, C::Numeric | C::Value) => (2, Conversion::CellValue),
        (C::Member | C::Tuple, C::String | C::Logical) => (3, Conversion::CellValue),
        (C::Member | C::Tuple, C::Set) => (2, Conversion::ToSet),
        (C::Hierarchy, C::Member) => (2, Conversion::CurrentMember),
        (C::Hierarchy, C::Tuple) => (3, Conversion::CurrentMember),
        (C::Hierarchy, C::Set) => (4, Conversion::CurrentMember),
        (C::Dimension, C::Hierarchy) => (1, Conversion::DimensionToHierarchy),
        (C::Dimension, C::Member) => (3, Conversion::DimensionToHierarchy),
        _ => return None,
    })
}

impl Type {
    pub fn category(&self) -> Category {
        match self {
            Type::Numeric => Category::Numeric,
            Type::String => Category::String,
            Type::Logical => Category::Logical,
            Type::Member(_) => Category::Member,
            Type::Tuple(_) => Category::Tuple,
            Type::Set(_) => Category::Set,
            Type::Level(_) => Category::Level,
            Type::Hierarchy(_) => Category::Hierarchy,
            Type::Dimension => Category::Dimension,
            Type::Null => Category::Null,
            Type::Empty => Category::Empty,
        }
    }

    pub fn member_set(hierarchy: Option<HierarchyId>) -> Type {
        Type::Set(Box::new(Type::Member(hierarchy)))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Type::Numeric | Type::String | Type::Logical | Type::Null
        )
    }

    /// Hierarchies of a member, tuple or set element, in order. `None` entries are unknown
    /// until evaluation.
    pub fn hierarchies(&self) -> Vec<Option<HierarchyId>> {
        match self {
            Type::Member(h) => vec![*h],
            Type::Tuple(hs) => hs.clone(),
            Type::Set(elem) => elem.hierarchies(),
            _ => Vec::new(),
        }
    }

    /// Statically known hierarchies only.
    pub fn known_hierarchies(&self) -> Vec<HierarchyId> {
        self.hierarchies().into_iter().flatten().collect()
    }

    /// Element type of a set, or the type itself for members and tuples.
    pub fn element(&self) -> Type {
        match self {
            Type::Set(elem) => (**elem).clone(),
            other => other.clone(),
        }
    }

    /// Tuple/member arity; `None` for the empty-set element, which matches any arity.
    pub fn arity(&self) -> Option<usize> {
        match self.element() {
            Type::Member(_) => Some(1),
            Type::Tuple(hs) => Some(hs.len()),
            _ => None,
        }
    }

    /// Element type describing `hierarchies`: a member type for one, a tuple type otherwise.
    pub fn element_of(hierarchies: Vec<Option<HierarchyId>>) -> Type {
        if hierarchies.len() == 1 {
            Type::Member(hierarchies[0])
        } else {
            Type::Tuple(hierarchies)
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Set(elem) => write!(f, "<Set of {}>", elem.category().label()),
            other => f.write_str(other.category().label()),
        }
    }
}
