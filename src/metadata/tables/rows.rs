//! Typed raw rows of the tables the slimmer reads.
//!
//! Heap references stay unresolved indices; the caller resolves names through the
//! `#Strings` heap.

use crate::{
    metadata::{
        streams::TablesHeader,
        tables::{CodedIndex, CodedIndexType, TableId},
    },
    Result,
};

/// A row of the `TypeRef` table (0x01)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeRefRaw {
    /// 1-based row id
    pub rid: u32,
    /// `Module`, `ModuleRef`, `AssemblyRef` or `TypeRef` the name is scoped to
    pub resolution_scope: CodedIndex,
    /// `#Strings` index of the name
    pub type_name: u32,
    /// `#Strings` index of the namespace
    pub type_namespace: u32,
}

impl TypeRefRaw {
    /// Read row `rid`.
    ///
    /// # Errors
    /// Returns an error if the row does not exist or the scope tag is invalid.
    pub fn read(tables: &TablesHeader, rid: u32) -> Result<TypeRefRaw> {
        let row = tables.row(TableId::TypeRef, rid)?;

        Ok(TypeRefRaw {
            rid,
            resolution_scope: CodedIndexType::ResolutionScope.decode(row[0])?,
            type_name: row[1],
            type_namespace: row[2],
        })
    }
}

/// A row of the `TypeDef` table (0x02)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDefRaw {
    /// 1-based row id
    pub rid: u32,
    /// `TypeAttributes`
    pub flags: u32,
    /// `#Strings` index of the name
    pub type_name: u32,
    /// `#Strings` index of the namespace
    pub type_namespace: u32,
    /// Base type, null for `<Module>`, interfaces and `System.Object`
    pub extends: CodedIndex,
    /// First row of the owned run in the `Field` table
    pub field_list: u32,
    /// First row of the owned run in the `MethodDef` table
    pub method_list: u32,
}

impl TypeDefRaw {
    /// Read row `rid`.
    ///
    /// # Errors
    /// Returns an error if the row does not exist or the base type tag is invalid.
    pub fn read(tables: &TablesHeader, rid: u32) -> Result<TypeDefRaw> {
        let row = tables.row(TableId::TypeDef, rid)?;

        Ok(TypeDefRaw {
            rid,
            flags: row[0],
            type_name: row[1],
            type_namespace: row[2],
            extends: CodedIndexType::TypeDefOrRef.decode(row[3])?,
            field_list: row[4],
            method_list: row[5],
        })
    }
}

/// A row of the `MethodDef` table (0x06)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDefRaw {
    /// 1-based row id
    pub rid: u32,
    /// RVA of the body, 0 when the method has none
    pub rva: u32,
    /// `MethodImplAttributes`
    pub impl_flags: u32,
    /// `MethodAttributes`
    pub flags: u32,
    /// `#Strings` index of the name
    pub name: u32,
    /// `#Blob` index of the signature
    pub signature: u32,
    /// First row of the owned run in the `Param` table
    pub param_list: u32,
}

impl MethodDefRaw {
    /// Column holding the RVA
    pub const RVA_COLUMN: usize = 0;

    /// Read row `rid`.
    ///
    /// # Errors
    /// Returns an error if the row does not exist.
    pub fn read(tables: &TablesHeader, rid: u32) -> Result<MethodDefRaw> {
        let row = tables.row(TableId::MethodDef, rid)?;

        Ok(MethodDefRaw {
            rid,
            rva: row[0],
            impl_flags: row[1],
            flags: row[2],
            name: row[3],
            signature: row[4],
            param_list: row[5],
        })
    }
}

/// A row of the `NestedClass` table (0x29)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NestedClassRaw {
    /// `TypeDef` row of the nested type
    pub nested_class: u32,
    /// `TypeDef` row of the enclosing type
    pub enclosing_class: u32,
}

impl NestedClassRaw {
    /// Read row `rid`.
    ///
    /// # Errors
    /// Returns an error if the row does not exist.
    pub fn read(tables: &TablesHeader, rid: u32) -> Result<NestedClassRaw> {
        let row = tables.row(TableId::NestedClass, rid)?;

        Ok(NestedClassRaw {
            nested_class: row[0],
            enclosing_class: row[1],
        })
    }
}

/// A row of the `GenericParam` table (0x2A)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericParamRaw {
    /// Position in the owner's parameter list
    pub number: u32,
    /// `GenericParamAttributes`
    pub flags: u32,
    /// Owning `TypeDef` or `MethodDef`
    pub owner: CodedIndex,
    /// `#Strings` index of the name
    pub name: u32,
}

impl GenericParamRaw {
    /// Read row `rid`.
    ///
    /// # Errors
    /// Returns an error if the row does not exist or the owner tag is invalid.
    pub fn read(tables: &TablesHeader, rid: u32) -> Result<GenericParamRaw> {
        let row = tables.row(TableId::GenericParam, rid)?;

        Ok(GenericParamRaw {
            number: row[0],
            flags: row[1],
            owner: CodedIndexType::TypeOrMethodDef.decode(row[2])?,
            name: row[3],
        })
    }
}
