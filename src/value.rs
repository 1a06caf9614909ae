use bytes::BytesMut;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type as PgType};

/// An owned scalar that can be bound to a statement parameter.
///
/// Records buffered by a [`BulkInserter`](crate::BulkInserter) and values
/// passed to the query helpers are built from these, so they have to own
/// their data rather than borrow it.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &PgType,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(value) => value.to_sql(ty, out),
            SqlValue::SmallInt(value) => value.to_sql(ty, out),
            SqlValue::Int(value) => value.to_sql(ty, out),
            SqlValue::BigInt(value) => value.to_sql(ty, out),
            SqlValue::Real(value) => value.to_sql(ty, out),
            SqlValue::Double(value) => value.to_sql(ty, out),
            SqlValue::Text(value) => value.to_sql(ty, out),
            SqlValue::Bytes(value) => value.as_slice().to_sql(ty, out),
            SqlValue::Decimal(value) => value.to_sql(ty, out),
            SqlValue::Timestamp(value) => value.to_sql(ty, out),
            SqlValue::Json(value) => value.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &PgType) -> bool {
        true
    }

    to_sql_checked!();
}

/// A statement parameter: either a value bound through the driver, or a raw
/// SQL expression spliced verbatim into the statement text and excluded from
/// the bound-parameter list (e.g. `updated_at = NOW()`).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Bound(SqlValue),
    Raw(String),
}

impl SqlParam {
    pub fn bound<V: Into<SqlValue>>(value: V) -> Self {
        SqlParam::Bound(value.into())
    }

    pub fn raw<S: Into<String>>(expression: S) -> Self {
        SqlParam::Raw(expression.into())
    }
}

impl From<SqlValue> for SqlParam {
    fn from(value: SqlValue) -> Self {
        SqlParam::Bound(value)
    }
}

macro_rules! impl_from_scalar {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(value: $ty) -> Self {
                    SqlValue::$variant(value)
                }
            }

            impl From<$ty> for SqlParam {
                fn from(value: $ty) -> Self {
                    SqlParam::Bound(SqlValue::$variant(value))
                }
            }
        )*
    };
}

impl_from_scalar!(
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
);

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Bound(SqlValue::Text(value.to_string()))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        SqlParam::Bound(value.map_or(SqlValue::Null, Into::into))
    }
}
