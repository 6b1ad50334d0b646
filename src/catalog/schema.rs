use std::fmt::Display;
use std::str::FromStr;

use anyhow::{Error, Result};

use crate::common::MAX_COLUMNS;
use crate::storage::layout::BlockLayout;

/// Fixed width column types. Variable length data is not stored in blocks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeId {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Timestamp,
}

impl TypeId {
    /// Size in bytes of a single value of this type
    pub fn size(&self) -> u8 {
        match self {
            TypeId::Boolean | TypeId::TinyInt => 1,
            TypeId::SmallInt => 2,
            TypeId::Integer => 4,
            TypeId::BigInt | TypeId::Double | TypeId::Timestamp => 8,
        }
    }
}

impl FromStr for TypeId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Boolean" => Ok(TypeId::Boolean),
            "TinyInt" => Ok(TypeId::TinyInt),
            "SmallInt" => Ok(TypeId::SmallInt),
            "Integer" => Ok(TypeId::Integer),
            "BigInt" => Ok(TypeId::BigInt),
            "Double" => Ok(TypeId::Double),
            "Timestamp" => Ok(TypeId::Timestamp),
            s => Err(Error::msg(format!("Invalid TypeId {}", s))),
        }
    }
}

impl Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDefinition {
    type_id: TypeId,
    column_name: String,
    primary_key: bool,
}

impl ColumnDefinition {
    pub fn new(type_id: TypeId, column_name: String, primary_key: bool) -> Self {
        Self {
            type_id,
            column_name,
            primary_key,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn primary_key(&self) -> bool {
        self.primary_key
    }
}

/// The columns of a relation in storage order.
/// The first column is always (part of) the primary key, its null bitmap tracks which slots are in use.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    columns: Vec<ColumnDefinition>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDefinition>) -> Result<Self> {
        match columns.first() {
            None => return Err(Error::msg("A schema needs at least one column")),
            Some(column) if !column.primary_key() => {
                return Err(Error::msg(format!(
                    "The first column has to be part of the primary key, but {} is not",
                    column.column_name()
                )))
            }
            Some(_) => (),
        }
        if columns.len() > MAX_COLUMNS as usize {
            return Err(Error::msg(format!(
                "A schema supports at most {} columns, got {}",
                MAX_COLUMNS,
                columns.len()
            )));
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn attr_sizes(&self) -> Vec<u8> {
        self.columns
            .iter()
            .map(|column| column.type_id().size())
            .collect()
    }

    pub fn layout(&self, block_size: u32) -> Result<BlockLayout> {
        BlockLayout::with_block_size(block_size, self.attr_sizes())
    }
}
