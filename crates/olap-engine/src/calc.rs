//! Compiled, executable expression plans.
//!
//! A [`Calc`] is a closed tree: every node kind the compiler can produce is a variant of
//! [`CalcKind`], and the evaluator dispatches on it with a single `match`. Nodes are immutable
//! after compilation and carry their static [`Type`] and the set of hierarchies whose current
//! member can change their result.
use olap_model::{DimensionId, HierarchyId, LevelId, MemberId, Value};
use smallvec::SmallVec;

use crate::types::Type;

/// A coordinate fragment: at most one member per hierarchy.
pub type Tuple = SmallVec<[MemberId; 4]>;

/// Small bitset over hierarchy ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct HierarchySet {
    words: SmallVec<[u64; 2]>,
}

impl HierarchySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(h: HierarchyId) -> Self {
        let mut set = Self::new();
        set.insert(h);
        set
    }

    pub fn insert(&mut self, h: HierarchyId) {
        let (word, bit) = (h.index() / 64, h.index() % 64);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << bit;
    }

    pub fn remove(&mut self, h: HierarchyId) {
        let (word, bit) = (h.index() / 64, h.index() % 64);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1 << bit);
        }
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }

    pub fn contains(&self, h: HierarchyId) -> bool {
        let (word, bit) = (h.index() / 64, h.index() % 64);
        self.words.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn union_with(&mut self, other: &HierarchySet) {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
    }

    pub fn without(&self, hierarchies: impl IntoIterator<Item = HierarchyId>) -> HierarchySet {
        let mut out = self.clone();
        for h in hierarchies {
            out.remove(h);
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = HierarchyId> + '_ {
        self.words.iter().enumerate().flat_map(|(w, bits)| {
            (0..64u32)
                .filter(move |b| bits & (1u64 << b) != 0)
                .map(move |b| HierarchyId(w as u32 * 64 + b))
        })
    }
}

impl FromIterator<HierarchyId> for HierarchySet {
    fn from_iter<I: IntoIterator<Item = HierarchyId>>(iter: I) -> Self {
        let mut set = HierarchySet::new();
        for h in iter {
            set.insert(h);
        }
        set
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Concat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberProperty {
    Name,
    UniqueName,
    Ordinal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Navigation {
    Parent,
    FirstChild,
    LastChild,
    PrevMember,
    NextMember,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetAggregate {
    Sum,
    Avg,
    Min,
    Max,
    /// The measure's own aggregator (sums for additive measures).
    Aggregate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetCombine {
    Union { all: bool },
    Except,
    Intersect,
}

#[derive(Clone, Debug)]
pub enum CalcKind {
    Constant(Value),
    Member(MemberId),
    Level(LevelId),
    Hierarchy(HierarchyId),
    Dimension(DimensionId),

    Binary {
        op: BinaryOp,
        left: Box<Calc>,
        right: Box<Calc>,
    },
    Unary {
        op: UnaryOp,
        arg: Box<Calc>,
    },
    /// `IIf` over scalars, members or sets (the node's type tells which).
    IIf {
        cond: Box<Calc>,
        then: Box<Calc>,
        otherwise: Box<Calc>,
    },
    IsEmpty(Box<Calc>),
    CoalesceEmpty(Vec<Calc>),
    /// Value of the cell at a member or tuple, other hierarchies taken from the context.
    CellValue(Box<Calc>),
    ToText(Box<Calc>),
    /// Property of a member, level, hierarchy or dimension (by the child's type).
    Property {
        prop: MemberProperty,
        object: Box<Calc>,
    },
    IsMember {
        left: Box<Calc>,
        right: Box<Calc>,
    },
    Count {
        set: Box<Calc>,
        include_empty: bool,
    },
    SetAggregate {
        func: SetAggregate,
        set: Box<Calc>,
        value: Option<Box<Calc>>,
    },

    CurrentMember(HierarchyId),
    /// Current member of a hierarchy computed at run time.
    DynamicCurrentMember(Box<Calc>),
    DefaultMember(Box<Calc>),
    Navigate {
        nav: Navigation,
        member: Box<Calc>,
    },
    /// `Lag`; `Lead` compiles to a negated offset.
    Lag {
        member: Box<Calc>,
        offset: Box<Calc>,
        negate: bool,
    },
    Ancestor {
        member: Box<Calc>,
        level: Box<Calc>,
    },
    LevelOf(Box<Calc>),
    HierarchyOf(Box<Calc>),
    DimensionOf(Box<Calc>),
    /// First hierarchy of a dimension.
    DimensionHierarchy(Box<Calc>),

    Tuple(Vec<Calc>),
    Item {
        set: Box<Calc>,
        index: Box<Calc>,
    },

    ToSet(Box<Calc>),
    SetLiteral(Vec<Calc>),
    /// Members of a level or hierarchy.
    Members(Box<Calc>),
    Children(Box<Calc>),
    Siblings(Box<Calc>),
    Descendants {
        member: Box<Calc>,
        level: Box<Calc>,
    },
    CrossJoin(Box<Calc>, Box<Calc>),
    Filter {
        set: Box<Calc>,
        cond: Box<Calc>,
    },
    Order {
        set: Box<Calc>,
        key: Box<Calc>,
        ascending: bool,
        /// `BASC`/`BDESC`: ignore the hierarchy when sorting.
        breaking: bool,
    },
    Head {
        set: Box<Calc>,
        count: Box<Calc>,
        from_end: bool,
    },
    TopCount {
        set: Box<Calc>,
        count: Box<Calc>,
        value: Option<Box<Calc>>,
        top: bool,
    },
    Combine {
        op: SetCombine,
        left: Box<Calc>,
        right: Box<Calc>,
    },
    Distinct(Box<Calc>),
    Generate {
        source: Box<Calc>,
        body: Box<Calc>,
        all: bool,
    },
    Hierarchize(Box<Calc>),
    Exists {
        set: Box<Calc>,
        filter: Box<Calc>,
    },
    NonEmpty {
        set: Box<Calc>,
        filter: Option<Box<Calc>>,
    },
    /// Projection of each tuple onto the given positions, de-duplicated.
    Extract {
        set: Box<Calc>,
        positions: Vec<usize>,
    },
}

#[derive(Clone, Debug)]
pub struct Calc {
    pub kind: CalcKind,
    pub ty: Type,
    pub deps: HierarchySet,
}

impl Calc {
    pub fn new(kind: CalcKind, ty: Type, deps: HierarchySet) -> Self {
        Self { kind, ty, deps }
    }

    pub fn constant(value: Value, ty: Type) -> Self {
        Self::new(CalcKind::Constant(value), ty, HierarchySet::new())
    }

    pub fn member(member: MemberId, hierarchy: HierarchyId) -> Self {
        Self::new(
            CalcKind::Member(member),
            Type::Member(Some(hierarchy)),
            HierarchySet::new(),
        )
    }

    /// Whether the result changes when the current member of `hierarchy` changes.
    pub fn depends_on(&self, hierarchy: HierarchyId) -> bool {
        self.deps.contains(hierarchy)
    }

    pub fn constant_value(&self) -> Option<&Value> {
        match &self.kind {
            CalcKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn constant_member(&self) -> Option<MemberId> {
        match self.kind {
            CalcKind::Member(m) => Some(m),
            _ => None,
        }
    }

    pub fn constant_level(&self) -> Option<LevelId> {
        match self.kind {
            CalcKind::Level(l) => Some(l),
            _ => None,
        }
    }

    pub fn constant_hierarchy(&self) -> Option<HierarchyId> {
        match self.kind {
            CalcKind::Hierarchy(h) => Some(h),
            _ => None,
        }
    }

    /// Address used as the identity of this node in per-execution memo tables.
    pub(crate) fn address(&self) -> usize {
        self as *const Calc as usize
    }

    /// Visit this node and every descendant.
    pub fn walk(&self, visit: &mut dyn FnMut(&Calc)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    pub fn children(&self) -> Vec<&Calc> {
        use CalcKind as K;
        match &self.kind {
            K::Constant(_)
            | K::Member(_)
            | K::Level(_)
            | K::Hierarchy(_)
            | K::Dimension(_)
            | K::CurrentMember(_) => Vec::new(),
            K::Unary { arg: a, .. }
            | K::IsEmpty(a)
            | K::CellValue(a)
            | K::ToText(a)
            | K::Property { object: a, .. }
            | K::Count { set: a, .. }
            | K::DynamicCurrentMember(a)
            | K::DefaultMember(a)
            | K::Navigate { member: a, .. }
            | K::LevelOf(a)
            | K::HierarchyOf(a)
            | K::DimensionOf(a)
            | K::DimensionHierarchy(a)
            | K::ToSet(a)
            | K::Members(a)
            | K::Children(a)
            | K::Siblings(a)
            | K::Distinct(a)
            | K::Hierarchize(a)
            | K::Extract { set: a, .. } => vec![&**a],
            K::Binary { left, right, .. }
            | K::IsMember { left, right }
            | K::CrossJoin(left, right)
            | K::Combine { left, right, .. }
            | K::Lag {
                member: left,
                offset: right,
                ..
            }
            | K::Ancestor {
                member: left,
                level: right,
            }
            | K::Item {
                set: left,
                index: right,
            }
            | K::Descendants {
                member: left,
                level: right,
            }
            | K::Filter {
                set: left,
                cond: right,
            }
            | K::Order {
                set: left,
                key: right,
                ..
            }
            | K::Head {
                set: left,
                count: right,
                ..
            }
            | K::Generate {
                source: left,
                body: right,
                ..
            }
            | K::Exists {
                set: left,
                filter: right,
            } => vec![&**left, &**right],
            K::IIf {
                cond,
                then,
                otherwise,
            } => vec![&**cond, &**then, &**otherwise],
            K::SetAggregate { set, value, .. } => {
                let mut out: Vec<&Calc> = vec![&**set];
                out.extend(value.as_deref());
                out
            }
            K::TopCount {
                set, count, value, ..
            } => {
                let mut out: Vec<&Calc> = vec![&**set, &**count];
                out.extend(value.as_deref());
                out
            }
            K::NonEmpty { set, filter } => {
                let mut out: Vec<&Calc> = vec![&**set];
                out.extend(filter.as_deref());
                out
            }
            K::CoalesceEmpty(items) | K::Tuple(items) | K::SetLiteral(items) => {
                items.iter().collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hierarchy_set_operations() {
        let mut set: HierarchySet = [HierarchyId(1), HierarchyId(70)].into_iter().collect();
        assert!(set.contains(HierarchyId(70)));
        assert!(!set.contains(HierarchyId(2)));
        set.union_with(&HierarchySet::single(HierarchyId(2)));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![HierarchyId(1), HierarchyId(2), HierarchyId(70)]
        );
        let rest = set.without([HierarchyId(1), HierarchyId(70)]);
        assert_eq!(rest, HierarchySet::single(HierarchyId(2)));
        assert!(HierarchySet::new().without([HierarchyId(5)]).is_empty());
    }
}
