//! Query expression tree.
//!
//! A fluent query arrives as a [`QueryChain`]: a source expression followed by
//! an ordered list of relational method calls. Each call carries nested
//! expression sub-trees (lambdas, member accesses, operators, constants).
//!
//! The same [`QueryExpr`] type is used before and after analysis. Analysis
//! replaces host-language constructs by resolved nodes (`Table`, `Column`,
//! `InputParameter`, `Special`, `SubSelect`, ...) that point into the
//! planner's arenas by index.

use serde::{Deserialize, Serialize};

pub mod builders;
pub mod qualifier;
pub mod rewriter;
pub mod value;

pub use value::{Record, Value, ValueType};

macro_rules! arena_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            pub struct $name(pub usize);
        )*
    };
}

arena_id!(ScopeId, TableId, ColumnId, ParamId, MetaTableId);

impl Default for ValueType {
    fn default() -> Self {
        ValueType::Object
    }
}

/// Which API surface a method belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodOwner {
    /// Query operators over a server-side sequence
    Queryable,
    /// Query operators over a host-side sequence
    Enumerable,
    String,
    Math,
    DateTime,
    Object,
    /// Static members of a primitive type, e.g. `Int32.Parse`
    Type(ValueType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    And,
    Or,
    ExclusiveOr,
    LeftShift,
    RightShift,
    AndAlso,
    OrElse,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Coalesce,
}

impl BinaryOp {
    /// Operators producing a boolean.
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            BinaryOp::AndAlso
                | BinaryOp::OrElse
                | BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    UnaryPlus,
    Convert,
}

/// Operators with a dedicated SQL rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialOp {
    // aggregates
    Count,
    Sum,
    Average,
    Min,
    Max,
    // predicates
    Like,
    In,
    IsNull,
    IsNotNull,
    // strings
    Concat,
    StringLength,
    ToUpper,
    ToLower,
    Trim,
    LTrim,
    RTrim,
    Substring,
    StringInsert,
    Replace,
    Remove,
    IndexOf,
    // dates
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
    Date,
    Now,
    DateDiffInMilliseconds,
    // math
    Abs,
    Exp,
    Floor,
    Ln,
    Log,
    Pow,
    Round,
    Sign,
    Sqrt,
}

impl SpecialOp {
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            SpecialOp::Count | SpecialOp::Sum | SpecialOp::Average | SpecialOp::Min | SpecialOp::Max
        )
    }

    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            SpecialOp::Like | SpecialOp::In | SpecialOp::IsNull | SpecialOp::IsNotNull
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub parameters: Vec<String>,
    pub body: Box<QueryExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub owner: MethodOwner,
    pub name: String,
    /// Instance target; `None` for static calls and chained query operators
    #[serde(default)]
    pub object: Option<Box<QueryExpr>>,
    #[serde(default)]
    pub arguments: Vec<QueryExpr>,
    /// Return type
    #[serde(default)]
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAccess {
    /// `None` for static members such as `DateTime.Now`
    #[serde(default)]
    pub object: Option<Box<QueryExpr>>,
    /// Declaring type of a static member
    #[serde(default)]
    pub owner: Option<ValueType>,
    pub name: String,
    #[serde(default)]
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: Box<QueryExpr>,
    pub right: Box<QueryExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<QueryExpr>,
    /// Result type; the conversion target for `Convert`
    #[serde(default)]
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    pub test: Box<QueryExpr>,
    pub if_true: Box<QueryExpr>,
    pub if_false: Box<QueryExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberBinding {
    pub name: String,
    pub value: QueryExpr,
}

/// Construction of a record or entity, with member initializers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpr {
    pub ty: ValueType,
    #[serde(default)]
    pub members: Vec<MemberBinding>,
}

impl NewExpr {
    pub fn member(&self, name: &str) -> Option<&QueryExpr> {
        self.members
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| &binding.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub lambda: Box<QueryExpr>,
    #[serde(default)]
    pub arguments: Vec<QueryExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialExpr {
    pub op: SpecialOp,
    pub operands: Vec<QueryExpr>,
}

/// `grouped` rows collected under `key`. Distinct is a group whose key and
/// value are the same expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupExpr {
    pub grouped: Box<QueryExpr>,
    pub key: Box<QueryExpr>,
}

/// A one-to-many association reached from a table, not yet joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySetExpr {
    pub table: TableId,
    pub member: String,
    pub entity: String,
}

/// A 0-based string index, shifted when the dialect counts from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOffset {
    pub operand: Box<QueryExpr>,
    pub one_based: bool,
}

impl IndexOffset {
    /// The shifted index when the operand is a constant that can absorb the shift.
    pub fn folded(&self) -> Option<i64> {
        match (self.one_based, self.operand.as_ref()) {
            (true, QueryExpr::Constant(Value::Int(n))) => n.checked_add(1),
            _ => None,
        }
    }
}

/// Column `index` of the current result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowValue {
    pub index: usize,
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryExpr {
    Constant(Value),
    /// Reference to a lambda parameter, by name
    Parameter(String),
    Lambda(Lambda),
    Quote(Box<QueryExpr>),
    Call(MethodCall),
    Member(MemberAccess),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Conditional(Conditional),
    New(NewExpr),
    Invoke(Invocation),

    // Resolved by analysis
    Table(TableId),
    Column(ColumnId),
    InputParameter(ParamId),
    Special(SpecialExpr),
    SubSelect(ScopeId),
    Group(GroupExpr),
    MetaTable(MetaTableId),
    EntitySet(EntitySetExpr),
    StartIndexOffset(IndexOffset),
    RowValue(RowValue),
}

impl QueryExpr {
    pub fn special(op: SpecialOp, operands: Vec<QueryExpr>) -> Self {
        QueryExpr::Special(SpecialExpr { op, operands })
    }

    pub fn binary(op: BinaryOp, left: QueryExpr, right: QueryExpr) -> Self {
        QueryExpr::Binary(BinaryExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(op: UnaryOp, operand: QueryExpr, ty: ValueType) -> Self {
        QueryExpr::Unary(UnaryExpr {
            op,
            operand: Box::new(operand),
            ty,
        })
    }

    pub fn convert(operand: QueryExpr, ty: ValueType) -> Self {
        QueryExpr::unary(UnaryOp::Convert, operand, ty)
    }

    pub fn conditional(test: QueryExpr, if_true: QueryExpr, if_false: QueryExpr) -> Self {
        QueryExpr::Conditional(Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        })
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            QueryExpr::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Direct sub-expressions, in evaluation order.
    pub fn children(&self) -> Vec<&QueryExpr> {
        match self {
            QueryExpr::Constant(_)
            | QueryExpr::Parameter(_)
            | QueryExpr::Table(_)
            | QueryExpr::Column(_)
            | QueryExpr::InputParameter(_)
            | QueryExpr::SubSelect(_)
            | QueryExpr::MetaTable(_)
            | QueryExpr::EntitySet(_)
            | QueryExpr::RowValue(_) => vec![],
            QueryExpr::Lambda(l) => vec![&l.body],
            QueryExpr::Quote(inner) => vec![inner],
            QueryExpr::Call(c) => c
                .object
                .iter()
                .map(|o| o.as_ref())
                .chain(c.arguments.iter())
                .collect(),
            QueryExpr::Member(m) => m.object.iter().map(|o| o.as_ref()).collect(),
            QueryExpr::Binary(b) => vec![&b.left, &b.right],
            QueryExpr::Unary(u) => vec![&u.operand],
            QueryExpr::Conditional(c) => vec![&c.test, &c.if_true, &c.if_false],
            QueryExpr::New(n) => n.members.iter().map(|m| &m.value).collect(),
            QueryExpr::Invoke(i) => std::iter::once(i.lambda.as_ref())
                .chain(i.arguments.iter())
                .collect(),
            QueryExpr::Special(s) => s.operands.iter().collect(),
            QueryExpr::Group(g) => vec![&g.grouped, &g.key],
            QueryExpr::StartIndexOffset(o) => vec![&o.operand],
        }
    }

    /// Rebuilds this node with every direct child replaced by `f(child)`.
    pub fn try_map_children<E>(
        &self,
        f: &mut impl FnMut(&QueryExpr) -> Result<QueryExpr, E>,
    ) -> Result<QueryExpr, E> {
        let mut boxed = |e: &QueryExpr| -> Result<Box<QueryExpr>, E> { Ok(Box::new(f(e)?)) };
        Ok(match self {
            QueryExpr::Constant(_)
            | QueryExpr::Parameter(_)
            | QueryExpr::Table(_)
            | QueryExpr::Column(_)
            | QueryExpr::InputParameter(_)
            | QueryExpr::SubSelect(_)
            | QueryExpr::MetaTable(_)
            | QueryExpr::EntitySet(_)
            | QueryExpr::RowValue(_) => self.clone(),
            QueryExpr::Lambda(l) => QueryExpr::Lambda(Lambda {
                parameters: l.parameters.clone(),
                body: boxed(&l.body)?,
            }),
            QueryExpr::Quote(inner) => QueryExpr::Quote(boxed(inner)?),
            QueryExpr::Call(c) => {
                let object = match &c.object {
                    Some(o) => Some(boxed(o)?),
                    None => None,
                };
                let arguments = c
                    .arguments
                    .iter()
                    .map(|a| boxed(a).map(|b| *b))
                    .collect::<Result<Vec<_>, E>>()?;
                QueryExpr::Call(MethodCall {
                    owner: c.owner.clone(),
                    name: c.name.clone(),
                    object,
                    arguments,
                    ty: c.ty.clone(),
                })
            }
            QueryExpr::Member(m) => QueryExpr::Member(MemberAccess {
                object: match &m.object {
                    Some(o) => Some(boxed(o)?),
                    None => None,
                },
                owner: m.owner.clone(),
                name: m.name.clone(),
                ty: m.ty.clone(),
            }),
            QueryExpr::Binary(b) => QueryExpr::Binary(BinaryExpr {
                op: b.op,
                left: boxed(&b.left)?,
                right: boxed(&b.right)?,
            }),
            QueryExpr::Unary(u) => QueryExpr::Unary(UnaryExpr {
                op: u.op,
                operand: boxed(&u.operand)?,
                ty: u.ty.clone(),
            }),
            QueryExpr::Conditional(c) => QueryExpr::Conditional(Conditional {
                test: boxed(&c.test)?,
                if_true: boxed(&c.if_true)?,
                if_false: boxed(&c.if_false)?,
            }),
            QueryExpr::New(n) => QueryExpr::New(NewExpr {
                ty: n.ty.clone(),
                members: n
                    .members
                    .iter()
                    .map(|m| {
                        Ok(MemberBinding {
                            name: m.name.clone(),
                            value: *boxed(&m.value)?,
                        })
                    })
                    .collect::<Result<Vec<_>, E>>()?,
            }),
            QueryExpr::Invoke(i) => QueryExpr::Invoke(Invocation {
                lambda: boxed(&i.lambda)?,
                arguments: i
                    .arguments
                    .iter()
                    .map(|a| boxed(a).map(|b| *b))
                    .collect::<Result<Vec<_>, E>>()?,
            }),
            QueryExpr::Special(s) => QueryExpr::Special(SpecialExpr {
                op: s.op,
                operands: s
                    .operands
                    .iter()
                    .map(|a| boxed(a).map(|b| *b))
                    .collect::<Result<Vec<_>, E>>()?,
            }),
            QueryExpr::Group(g) => QueryExpr::Group(GroupExpr {
                grouped: boxed(&g.grouped)?,
                key: boxed(&g.key)?,
            }),
            QueryExpr::StartIndexOffset(o) => QueryExpr::StartIndexOffset(IndexOffset {
                operand: boxed(&o.operand)?,
                one_based: o.one_based,
            }),
        })
    }

    /// True if `pred` holds for this node or any descendant.
    pub fn any(&self, pred: &impl Fn(&QueryExpr) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|child| child.any(pred))
    }

    /// Pre-order walk.
    pub fn visit(&self, f: &mut impl FnMut(&QueryExpr)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }
}

/// A fluent query: a source followed by chained operations. Chained
/// operations omit their source operand; it is supplied during analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryChain {
    pub source: QueryExpr,
    #[serde(default)]
    pub operations: Vec<MethodCall>,
}

impl QueryChain {
    pub fn new(source: QueryExpr) -> Self {
        QueryChain {
            source,
            operations: Vec::new(),
        }
    }

    /// Canonical text used for structural comparison and cache keys.
    pub fn canonical_form(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
