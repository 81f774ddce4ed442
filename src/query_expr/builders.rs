//! Constructors for building query chains in code.
//!
//! ```ignore
//! let chain = table("Person")
//!     .filter(lambda(&["p"], gt(member(param("p"), "Age", ValueType::Int32), constant(18))))
//!     .take(10);
//! ```

use super::{
    BinaryOp, Invocation, Lambda, MemberAccess, MemberBinding, MethodCall, MethodOwner, NewExpr,
    QueryChain, QueryExpr, UnaryOp, Value, ValueType,
};

/// Chain over the table of `entity`.
pub fn table(entity: &str) -> QueryChain {
    QueryChain::new(QueryExpr::Constant(Value::Table(entity.to_string())))
}

impl QueryChain {
    /// Appends a query operator call.
    pub fn then(mut self, name: &str, arguments: Vec<QueryExpr>) -> Self {
        self.operations.push(MethodCall {
            owner: MethodOwner::Queryable,
            name: name.to_string(),
            object: None,
            arguments,
            ty: ValueType::Object,
        });
        self
    }

    pub fn filter(self, predicate: QueryExpr) -> Self {
        self.then("Where", vec![predicate])
    }

    pub fn select(self, selector: QueryExpr) -> Self {
        self.then("Select", vec![selector])
    }

    pub fn order_by(self, key: QueryExpr) -> Self {
        self.then("OrderBy", vec![key])
    }

    pub fn take(self, count: i64) -> Self {
        self.then("Take", vec![constant(count)])
    }

    pub fn skip(self, count: i64) -> Self {
        self.then("Skip", vec![constant(count)])
    }

    pub fn count(self) -> Self {
        self.then("Count", vec![])
    }

    pub fn any(self, predicate: Option<QueryExpr>) -> Self {
        self.then("Any", predicate.into_iter().collect())
    }

    /// Wraps the chain as a constant, for use as the second operand of a
    /// set operation or as a `Contains` source.
    pub fn into_expr(self) -> QueryExpr {
        QueryExpr::Constant(Value::Query(Box::new(self)))
    }
}

/// A quoted lambda, as query operators receive them.
pub fn lambda(parameters: &[&str], body: QueryExpr) -> QueryExpr {
    QueryExpr::Quote(Box::new(raw_lambda(parameters, body)))
}

pub fn raw_lambda(parameters: &[&str], body: QueryExpr) -> QueryExpr {
    QueryExpr::Lambda(Lambda {
        parameters: parameters.iter().map(|p| p.to_string()).collect(),
        body: Box::new(body),
    })
}

pub fn param(name: &str) -> QueryExpr {
    QueryExpr::Parameter(name.to_string())
}

pub fn constant(value: impl Into<Value>) -> QueryExpr {
    QueryExpr::Constant(value.into())
}

pub fn member(object: QueryExpr, name: &str, ty: ValueType) -> QueryExpr {
    QueryExpr::Member(MemberAccess {
        object: Some(Box::new(object)),
        owner: None,
        name: name.to_string(),
        ty,
    })
}

pub fn static_member(owner: ValueType, name: &str, ty: ValueType) -> QueryExpr {
    QueryExpr::Member(MemberAccess {
        object: None,
        owner: Some(owner),
        name: name.to_string(),
        ty,
    })
}

pub fn call(
    owner: MethodOwner,
    name: &str,
    object: Option<QueryExpr>,
    arguments: Vec<QueryExpr>,
    ty: ValueType,
) -> QueryExpr {
    QueryExpr::Call(MethodCall {
        owner,
        name: name.to_string(),
        object: object.map(Box::new),
        arguments,
        ty,
    })
}

/// An anonymous record construction.
pub fn new_record(type_name: &str, members: Vec<(&str, QueryExpr)>) -> QueryExpr {
    QueryExpr::New(NewExpr {
        ty: ValueType::Record(type_name.to_string()),
        members: members
            .into_iter()
            .map(|(name, value)| MemberBinding {
                name: name.to_string(),
                value,
            })
            .collect(),
    })
}

pub fn invoke(lambda: QueryExpr, arguments: Vec<QueryExpr>) -> QueryExpr {
    QueryExpr::Invoke(Invocation {
        lambda: Box::new(lambda),
        arguments,
    })
}

pub fn not(operand: QueryExpr) -> QueryExpr {
    QueryExpr::unary(UnaryOp::Not, operand, ValueType::Bool)
}

pub fn eq(left: QueryExpr, right: QueryExpr) -> QueryExpr {
    QueryExpr::binary(BinaryOp::Equal, left, right)
}

pub fn gt(left: QueryExpr, right: QueryExpr) -> QueryExpr {
    QueryExpr::binary(BinaryOp::GreaterThan, left, right)
}

pub fn lt(left: QueryExpr, right: QueryExpr) -> QueryExpr {
    QueryExpr::binary(BinaryOp::LessThan, left, right)
}

pub fn and_also(left: QueryExpr, right: QueryExpr) -> QueryExpr {
    QueryExpr::binary(BinaryOp::AndAlso, left, right)
}

pub fn add(left: QueryExpr, right: QueryExpr) -> QueryExpr {
    QueryExpr::binary(BinaryOp::Add, left, right)
}
