//! # SQLx 数据库类型转换实现
//!
//! 本模块仅在启用 `sqlx-support` feature 时编译，
//! 状态枚举以 VARCHAR 形式存储，取值与序列化名称一致。

use crate::entities::{ConnectionState, ExperimentStatus, TaskStatus, WorkerStatus};

macro_rules! impl_varchar_enum {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(s.parse::<$ty>()?)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }
    };
}

impl_varchar_enum!(TaskStatus);
impl_varchar_enum!(WorkerStatus);
impl_varchar_enum!(ConnectionState);
impl_varchar_enum!(ExperimentStatus);
