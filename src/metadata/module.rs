//! In-memory, mutable view of one managed module.
//!
//! [`ManagedModule`] loads the type and method definitions of a module and can neutralize
//! the bodies of prunable types. Metadata tables are never resized: a stubbed method either
//! has its body overwritten in place with [`STUB_BODY`], or has the RVA column of its
//! `MethodDef` row redirected to a stub body elsewhere in the same image. When no body is
//! large enough to hold the stub, one is placed in the unused tail of the code section.
//! Type identity, signatures, fields and visibility are therefore preserved byte for byte.
//!
//! A modified ReadyToRun image loses its precompiled code, so the runtime compiles the
//! rewritten IL instead of running the original native code.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotslim::ManagedModule;
//! use std::{collections::HashSet, path::Path};
//!
//! let mut module = ManagedModule::from_file(Path::new("app/Library.dll"))?;
//! let used: HashSet<String> = ["Library.Program".to_string()].into_iter().collect();
//!
//! let outcome = module.slim(&used)?;
//! if module.is_modified() {
//!     module.save()?;
//! }
//! println!("{} methods stubbed", outcome.methods_stubbed);
//! # Ok::<(), dotslim::Error>(())
//! ```

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::Write,
    path::{Path, PathBuf},
};

use goblin::pe::section_table::SectionTable;

use crate::{
    file::{
        io::{read_le_at, write_le},
        section_offset, File,
    },
    metadata::{
        cor20header::Cor20Header,
        method::{
            MethodBody, MethodImplCodeType, MethodImplOptions, MethodModifiers, TypeAttributes,
            STUB_BODY,
        },
        root::Root,
        streams::{Strings, TablesHeader},
        tables::{
            CodedIndex, GenericParamRaw, MethodDefRaw, NestedClassRaw, TableId, TypeDefRaw,
            TypeRefRaw,
        },
        token::Token,
    },
    Error::OutOfBounds,
    Result,
};

/// Name of the instance constructor
pub const CONSTRUCTOR: &str = ".ctor";
/// Name of the type initializer
pub const TYPE_INITIALIZER: &str = ".cctor";

/// Why a type definition is never pruned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum Retention {
    /// The synthetic `<Module>` type holding global members
    #[strum(to_string = "global")]
    Global,
    /// Derives from `System.ValueType` or `System.Enum`
    #[strum(to_string = "value-type")]
    ValueType,
    /// Declared inside another type
    #[strum(to_string = "nested")]
    Nested,
    /// Declares generic parameters
    #[strum(to_string = "generic")]
    Generic,
    /// Observed as used
    #[strum(to_string = "used")]
    Used,
}

/// One method of a type definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDefinition {
    /// Row in the `MethodDef` table
    pub token: Token,
    /// Simple name
    pub name: String,
    /// RVA of the body, 0 when there is none
    pub rva: u32,
    /// `MethodAttributes`
    pub flags: u32,
    /// `MethodImplAttributes`
    pub impl_flags: u32,
    /// Absolute file offset of the RVA cell of the `MethodDef` row
    rva_cell: usize,
}

impl MethodDefinition {
    /// True for `.ctor` and `.cctor`
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR || self.name == TYPE_INITIALIZER
    }

    /// True if the method has an IL body the runtime would execute.
    ///
    /// Abstract methods, P/Invoke stubs, internal calls and native or runtime provided
    /// implementations have no replaceable body.
    #[must_use]
    pub fn has_il_body(&self) -> bool {
        self.rva != 0
            && MethodImplCodeType::from_impl_flags(self.impl_flags) == MethodImplCodeType::IL
            && !MethodImplOptions::from_bits_truncate(self.impl_flags)
                .contains(MethodImplOptions::INTERNAL_CALL)
            && !MethodModifiers::from_bits_truncate(self.flags).intersects(
                MethodModifiers::ABSTRACT | MethodModifiers::PINVOKE_IMPL,
            )
    }

    /// True if the body of this method may be replaced by the stub
    #[must_use]
    pub fn can_stub(&self) -> bool {
        self.has_il_body() && !self.is_constructor()
    }
}

/// One row of the `TypeDef` table with the facts the prunability rules need.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDefinition {
    /// Row in the `TypeDef` table
    pub token: Token,
    /// Namespace, possibly empty
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// `TypeAttributes`
    pub flags: u32,
    /// Derives from `System.ValueType` or `System.Enum`
    pub is_value_type: bool,
    /// Declared inside another type
    pub is_nested: bool,
    /// Declares generic parameters
    pub has_generic_parameters: bool,
    /// The synthetic `<Module>` type
    pub is_global: bool,
    /// Methods owned by this type, in table order
    pub methods: Vec<MethodDefinition>,
}

impl TypeDefinition {
    /// `Namespace.Name`, or just `Name` for the global namespace
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// First rule that keeps this type, or `None` if the type is prunable.
    #[must_use]
    pub fn retention(&self, used_types: &HashSet<String>) -> Option<Retention> {
        if self.is_global {
            Some(Retention::Global)
        } else if self.is_value_type {
            Some(Retention::ValueType)
        } else if self.is_nested {
            Some(Retention::Nested)
        } else if self.has_generic_parameters {
            Some(Retention::Generic)
        } else if used_types.contains(&self.full_name()) {
            Some(Retention::Used)
        } else {
            None
        }
    }

    /// True if the method bodies of this type may be stubbed
    #[must_use]
    pub fn is_prunable(&self, used_types: &HashSet<String>) -> bool {
        self.retention(used_types).is_none()
    }
}

/// Result of slimming one module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlimOutcome {
    /// Types whose methods were considered for stubbing
    pub types_pruned: usize,
    /// Bodies overwritten in place
    pub methods_stubbed: usize,
    /// Methods pointed at a shared stub body
    pub methods_redirected: usize,
    /// Methods whose body already was the stub
    pub methods_already_stubbed: usize,
    /// Whether the precompiled ReadyToRun code of the image was dropped
    pub native_code_dropped: bool,
    /// Whether the module file was rewritten
    pub rewritten: bool,
}

impl SlimOutcome {
    /// True if any method was changed
    #[must_use]
    pub fn changed(&self) -> bool {
        self.methods_stubbed + self.methods_redirected > 0
    }
}

/// A loaded managed module.
pub struct ManagedModule {
    path: Option<PathBuf>,
    data: Vec<u8>,
    sections: Vec<SectionTable>,
    types: Vec<TypeDefinition>,
    cor20_offset: usize,
    ready_to_run: bool,
    modified: bool,
}

/// Size of the COFF file header following the `PE\0\0` signature
const COFF_HEADER_SIZE: usize = 20;
/// Size of one section table entry
const SECTION_HEADER_SIZE: usize = 40;

impl ManagedModule {
    /// Load the module at `path`.
    ///
    /// # Errors
    /// Returns an error if the file is not a managed module or its metadata is malformed.
    pub fn from_file(path: &Path) -> Result<ManagedModule> {
        let file = File::from_file(path)?;
        let mut module = Self::load(&file)?;
        module.path = Some(path.to_path_buf());

        Ok(module)
    }

    /// Load a module from an in-memory image.
    ///
    /// # Errors
    /// Returns an error if the buffer is not a managed module or its metadata is malformed.
    pub fn from_mem(data: Vec<u8>) -> Result<ManagedModule> {
        let file = File::from_mem(data)?;
        Self::load(&file)
    }

    fn load(file: &File) -> Result<ManagedModule> {
        let (clr_rva, _) = file.clr()?;
        let clr_offset = file.rva_to_offset(clr_rva)?;
        let cor20 = Cor20Header::read(file.data_slice(clr_offset, 72)?)?;

        let meta_offset = file.rva_to_offset(cor20.meta_data_rva as usize)?;
        let meta = file.data_slice(meta_offset, cor20.meta_data_size as usize)?;
        let root = Root::read(meta)?;

        let Some(tables_stream) = root.stream("#~").or_else(|| root.stream("#-")) else {
            return Err(malformed_error!("Metadata has no tables stream"));
        };
        let Some(strings_stream) = root.stream("#Strings") else {
            return Err(malformed_error!("Metadata has no #Strings stream"));
        };

        let tables_start = tables_stream.offset as usize;
        let tables_data = &meta[tables_start..tables_start + tables_stream.size as usize];
        let strings_start = strings_stream.offset as usize;
        let strings = Strings::from(&meta[strings_start..strings_start + strings_stream.size as usize])?;
        let tables = TablesHeader::from(tables_data)?;

        let types = read_types(&tables, &strings, meta_offset + tables_start)?;

        Ok(ManagedModule {
            path: None,
            data: file.data().to_vec(),
            sections: file.sections(),
            types,
            cor20_offset: clr_offset,
            ready_to_run: cor20.is_ready_to_run(),
            modified: false,
        })
    }

    /// Path the module was loaded from
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Type definitions in table order, `<Module>` first
    #[must_use]
    pub fn types(&self) -> &[TypeDefinition] {
        &self.types
    }

    /// Top-level types that may be stubbed for the given usage set
    pub fn prunable_types<'a>(
        &'a self,
        used_types: &'a HashSet<String>,
    ) -> impl Iterator<Item = &'a TypeDefinition> + 'a {
        self.types.iter().filter(|ty| ty.is_prunable(used_types))
    }

    /// True if the image carries precompiled ReadyToRun code
    #[must_use]
    pub fn is_ready_to_run(&self) -> bool {
        self.ready_to_run
    }

    /// True if [`ManagedModule::slim`] changed the image
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Current image bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the module and return the image bytes
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Replace the bodies of all stubbable methods of prunable types with [`STUB_BODY`].
    ///
    /// A body is overwritten in place when it has room for the stub and every method sharing
    /// it is stubbed as well. Any other method is redirected to a stub body placed earlier,
    /// found already present, or written into the slack of the code section. Methods whose
    /// body already is the stub are left alone, so slimming an already slimmed module changes
    /// nothing. If anything changed in a ReadyToRun image, its native code is dropped.
    ///
    /// # Errors
    /// Returns an error if a method body or RVA cannot be mapped into the image, or if a
    /// method needs a shared stub and the code section has no room left for one.
    pub fn slim(&mut self, used_types: &HashSet<String>) -> Result<SlimOutcome> {
        let mut outcome = SlimOutcome::default();

        let mut candidates = Vec::new();
        for ty in self.prunable_types(used_types) {
            outcome.types_pruned += 1;
            candidates.extend(ty.methods.iter().filter(|method| method.can_stub()).cloned());
        }

        if candidates.is_empty() {
            return Ok(outcome);
        }

        let candidate_rows: HashSet<Token> = candidates.iter().map(|method| method.token).collect();

        let mut sharers: HashMap<u32, Vec<Token>> = HashMap::new();
        for method in self.types.iter().flat_map(|ty| ty.methods.iter()) {
            if method.rva != 0 {
                sharers.entry(method.rva).or_default().push(method.token);
            }
        }

        let mut stub_rva = None;
        for method in self.types.iter().flat_map(|ty| ty.methods.iter()) {
            if method.has_il_body() && MethodBody::is_stub(self.body(method.rva)?) {
                stub_rva = Some(method.rva);
                break;
            }
        }

        let mut overwritten = HashSet::new();
        let mut pending = Vec::new();
        for method in &candidates {
            if overwritten.contains(&method.rva) {
                outcome.methods_stubbed += 1;
                continue;
            }

            let body = self.body(method.rva)?;
            if MethodBody::is_stub(body) {
                outcome.methods_already_stubbed += 1;
                continue;
            }

            let size = MethodBody::from(body)?.total_size();
            let exclusive = sharers
                .get(&method.rva)
                .is_some_and(|rows| rows.iter().all(|row| candidate_rows.contains(row)));

            if size >= STUB_BODY.len() && exclusive {
                let offset = section_offset(&self.sections, method.rva)?;
                self.data[offset..offset + STUB_BODY.len()].copy_from_slice(&STUB_BODY);
                overwritten.insert(method.rva);
                stub_rva.get_or_insert(method.rva);
                outcome.methods_stubbed += 1;
            } else if let Some(target) = stub_rva {
                self.redirect(method, target)?;
                outcome.methods_redirected += 1;
            } else {
                pending.push(method);
            }
        }

        for method in pending {
            let target = match stub_rva {
                Some(target) => target,
                None => *stub_rva.insert(self.place_stub(method.rva)?),
            };
            self.redirect(method, target)?;
            outcome.methods_redirected += 1;
        }

        if outcome.changed() {
            self.modified = true;
            if self.ready_to_run {
                self.drop_native_code()?;
                outcome.native_code_dropped = true;
            }
        }

        Ok(outcome)
    }

    /// Overwrite the file the module was loaded from with the current image.
    ///
    /// The image is written to a temporary file in the same directory which then replaces
    /// the original, so a failed write leaves the original untouched.
    ///
    /// # Errors
    /// Returns an error if the module was loaded from memory or the write fails.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Err(crate::Error::Error(
                "Module was not loaded from a file".to_string(),
            ));
        };

        self.save_as(path)
    }

    /// Atomically write the current image to `path`.
    ///
    /// # Errors
    /// Returns an error if the temporary file cannot be written or renamed.
    pub fn save_as(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&self.data)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|error| error.error)?;

        Ok(())
    }

    /// Writes [`STUB_BODY`] into the zero-filled tail between the virtual and the raw size of
    /// the section holding `body_rva`, and grows the section to cover it.
    fn place_stub(&mut self, body_rva: u32) -> Result<u32> {
        let Some(index) = self.sections.iter().position(|section| {
            let span = section.virtual_size.max(section.size_of_raw_data);
            section.virtual_address <= body_rva
                && u64::from(body_rva) < u64::from(section.virtual_address) + u64::from(span)
        }) else {
            return Err(malformed_error!("No section holds method body at 0x{:X}", body_rva));
        };

        let section = &self.sections[index];
        let start = section.virtual_size.next_multiple_of(4);
        let end = start.saturating_add(STUB_BODY.len() as u32);
        let mapped_end = u64::from(section.virtual_address) + u64::from(end);
        let overlaps = self.sections.iter().any(|other| {
            other.virtual_address > section.virtual_address
                && u64::from(other.virtual_address) < mapped_end
        });
        if section.virtual_size == 0 || end > section.size_of_raw_data || overlaps {
            return Err(crate::Error::Error(format!(
                "No room for a stub body in section {}",
                String::from_utf8_lossy(&section.name).trim_end_matches('\0')
            )));
        }

        let offset = section.pointer_to_raw_data as usize + start as usize;
        let slot = self
            .data
            .get_mut(offset..offset + STUB_BODY.len())
            .ok_or(OutOfBounds)?;
        if slot.iter().any(|byte| *byte != 0) {
            return Err(crate::Error::Error(
                "Section slack is not empty, refusing to place a stub body".to_string(),
            ));
        }
        slot.copy_from_slice(&STUB_BODY);

        let header = self.section_header_offset(index)?;
        let virtual_size = self.data.get_mut(header + 8..header + 12).ok_or(OutOfBounds)?;
        write_le(virtual_size, end)?;
        self.sections[index].virtual_size = end;

        let rva = self.sections[index].virtual_address + start;
        log::debug!("Placed stub body at 0x{:X}", rva);
        Ok(rva)
    }

    fn section_header_offset(&self, index: usize) -> Result<usize> {
        let mut offset = 0x3C;
        let pe_offset = read_le_at::<u32>(&self.data, &mut offset)? as usize;
        let mut offset = pe_offset + 4 + 16;
        let optional_header_size = read_le_at::<u16>(&self.data, &mut offset)? as usize;

        Ok(pe_offset + 4 + COFF_HEADER_SIZE + optional_header_size + index * SECTION_HEADER_SIZE)
    }

    /// Clears the `ManagedNativeHeader` directory and `COMIMAGE_FLAGS_IL_LIBRARY`.
    fn drop_native_code(&mut self) -> Result<()> {
        let directory = self.cor20_offset + Cor20Header::MANAGED_NATIVE_HEADER_OFFSET;
        self.data
            .get_mut(directory..directory + 8)
            .ok_or(OutOfBounds)?
            .fill(0);

        let flags_offset = self.cor20_offset + Cor20Header::FLAGS_OFFSET;
        let mut cursor = flags_offset;
        let flags = read_le_at::<u32>(&self.data, &mut cursor)?;
        let cell = self
            .data
            .get_mut(flags_offset..flags_offset + 4)
            .ok_or(OutOfBounds)?;
        write_le(cell, flags & !Cor20Header::FLAG_IL_LIBRARY)?;

        self.ready_to_run = false;
        log::debug!("Dropped ReadyToRun code");
        Ok(())
    }

    fn body(&self, rva: u32) -> Result<&[u8]> {
        let offset = section_offset(&self.sections, rva)?;
        self.data.get(offset..).ok_or(OutOfBounds)
    }

    fn redirect(&mut self, method: &MethodDefinition, target: u32) -> Result<()> {
        let cell = self
            .data
            .get_mut(method.rva_cell..method.rva_cell + 4)
            .ok_or(OutOfBounds)?;
        write_le(cell, target)?;

        if let Some(entry) = self
            .types
            .iter_mut()
            .flat_map(|ty| ty.methods.iter_mut())
            .find(|entry| entry.token == method.token)
        {
            entry.rva = target;
        }

        log::debug!(
            "Redirected {} ({}) from 0x{:X} to stub at 0x{:X}",
            method.name,
            method.token,
            method.rva,
            target
        );
        Ok(())
    }
}

const VALUE_TYPE_BASES: [(&str, &str); 2] = [("System", "ValueType"), ("System", "Enum")];

fn read_types(
    tables: &TablesHeader,
    strings: &Strings,
    tables_file_offset: usize,
) -> Result<Vec<TypeDefinition>> {
    let type_count = tables.row_count(TableId::TypeDef);
    let method_count = tables.row_count(TableId::MethodDef);

    let mut nested = HashSet::new();
    for rid in 1..=tables.row_count(TableId::NestedClass) {
        nested.insert(NestedClassRaw::read(tables, rid)?.nested_class);
    }

    let mut generic = HashSet::new();
    for rid in 1..=tables.row_count(TableId::GenericParam) {
        let param = GenericParamRaw::read(tables, rid)?;
        if param.owner.table == TableId::TypeDef {
            generic.insert(param.owner.row);
        }
    }

    let raw_types = (1..=type_count)
        .map(|rid| TypeDefRaw::read(tables, rid))
        .collect::<Result<Vec<_>>>()?;

    let mut method_owner = BTreeMap::new();
    for (index, raw) in raw_types.iter().enumerate() {
        let end = raw_types
            .get(index + 1)
            .map_or(method_count + 1, |next| next.method_list)
            .min(method_count + 1);
        for list_index in raw.method_list.max(1)..end {
            method_owner.insert(list_index, raw.rid);
        }
    }

    let mut methods: HashMap<u32, Vec<MethodDefinition>> = HashMap::new();
    for (list_index, owner) in method_owner {
        let rid = method_row(tables, list_index)?;
        let raw = MethodDefRaw::read(tables, rid)?;
        let (cell, _) = tables.cell_offset(TableId::MethodDef, rid, MethodDefRaw::RVA_COLUMN)?;

        methods.entry(owner).or_default().push(MethodDefinition {
            token: Token::from_parts(TableId::MethodDef, rid),
            name: strings.get(raw.name as usize)?.to_string(),
            rva: raw.rva,
            flags: raw.flags,
            impl_flags: raw.impl_flags,
            rva_cell: tables_file_offset + cell,
        });
    }

    raw_types
        .into_iter()
        .map(|raw| {
            Ok(TypeDefinition {
                token: Token::from_parts(TableId::TypeDef, raw.rid),
                namespace: strings.get(raw.type_namespace as usize)?.to_string(),
                name: strings.get(raw.type_name as usize)?.to_string(),
                flags: raw.flags,
                is_value_type: is_value_type_base(tables, strings, raw.extends)?,
                is_nested: nested.contains(&raw.rid)
                    || TypeAttributes::is_nested_visibility(raw.flags),
                has_generic_parameters: generic.contains(&raw.rid),
                is_global: raw.rid == 1,
                methods: methods.remove(&raw.rid).unwrap_or_default(),
            })
        })
        .collect()
}

/// Resolves an index into the method list through `MethodPtr` when that table is present.
fn method_row(tables: &TablesHeader, list_index: u32) -> Result<u32> {
    if tables.row_count(TableId::MethodPtr) == 0 {
        Ok(list_index)
    } else {
        tables.cell(TableId::MethodPtr, list_index, 0)
    }
}

fn is_value_type_base(tables: &TablesHeader, strings: &Strings, extends: CodedIndex) -> Result<bool> {
    if extends.is_null() {
        return Ok(false);
    }

    let (namespace, name) = match extends.table {
        TableId::TypeRef => {
            let base = TypeRefRaw::read(tables, extends.row)?;
            (base.type_namespace, base.type_name)
        }
        TableId::TypeDef => {
            let base = TypeDefRaw::read(tables, extends.row)?;
            (base.type_namespace, base.type_name)
        }
        _ => return Ok(false),
    };

    let namespace = strings.get(namespace as usize)?;
    let name = strings.get(name as usize)?;

    Ok(VALUE_TYPE_BASES
        .iter()
        .any(|(base_namespace, base_name)| *base_namespace == namespace && *base_name == name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{TestImage, TestMethod, TestType};

    fn used(names: &[&str]) -> HashSet<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    fn sample() -> Vec<u8> {
        TestImage::new("Sample")
            .with_type(
                TestType::class("Demo", "Used")
                    .with_method(TestMethod::ctor())
                    .with_method(TestMethod::new("Run")),
            )
            .with_type(
                TestType::class("Demo", "Unused")
                    .with_method(TestMethod::ctor())
                    .with_method(TestMethod::cctor())
                    .with_method(TestMethod::new("Compute").with_fat_body(24))
                    .with_method(TestMethod::new("Tiny").with_code(&[0x2A]))
                    .with_method(TestMethod::new("Abstract").abstract_method())
                    .with_method(TestMethod::new("Extern").internal_call()),
            )
            .with_type(TestType::value_type("Demo", "Point").with_method(TestMethod::new("Length")))
            .with_type(TestType::enumeration("Demo", "Color"))
            .with_type(TestType::class("Demo", "Box`1").generic().with_method(TestMethod::new("Get")))
            .with_type(
                TestType::class("", "Inner")
                    .nested_in(3)
                    .with_method(TestMethod::new("Helper")),
            )
            .build()
    }

    #[test]
    fn load_types() {
        let module = ManagedModule::from_mem(sample()).unwrap();
        let types = module.types();

        assert_eq!(types.len(), 7);
        assert!(types[0].is_global);
        assert_eq!(types[0].name, "<Module>");
        assert_eq!(types[1].full_name(), "Demo.Used");
        assert_eq!(types[2].methods.len(), 6);
        assert!(types[3].is_value_type);
        assert!(types[4].is_value_type);
        assert!(types[5].has_generic_parameters);
        assert!(types[6].is_nested);
        assert_eq!(types[6].full_name(), "Inner");
    }

    #[test]
    fn retention_rules() {
        let module = ManagedModule::from_mem(sample()).unwrap();
        let used = used(&["Demo.Used"]);
        let types = module.types();

        assert_eq!(types[0].retention(&used), Some(Retention::Global));
        assert_eq!(types[1].retention(&used), Some(Retention::Used));
        assert_eq!(types[2].retention(&used), None);
        assert_eq!(types[3].retention(&used), Some(Retention::ValueType));
        assert_eq!(types[5].retention(&used), Some(Retention::Generic));
        assert_eq!(types[6].retention(&used), Some(Retention::Nested));

        let prunable: Vec<_> = module.prunable_types(&used).map(|ty| ty.full_name()).collect();
        assert_eq!(prunable, vec!["Demo.Unused"]);
    }

    #[test]
    fn stubbable_methods() {
        let module = ManagedModule::from_mem(sample()).unwrap();
        let methods = &module.types()[2].methods;

        let names: Vec<_> = methods
            .iter()
            .filter(|method| method.can_stub())
            .map(|method| method.name.as_str())
            .collect();
        assert_eq!(names, vec!["Compute", "Tiny"]);
        assert!(methods[0].is_constructor());
        assert!(methods[1].is_constructor());
    }

    #[test]
    fn slim_stubs_unused_type() {
        let original = sample();
        let mut module = ManagedModule::from_mem(original.clone()).unwrap();

        let outcome = module.slim(&used(&["Demo.Used"])).unwrap();
        assert_eq!(outcome.types_pruned, 1);
        assert_eq!(outcome.methods_stubbed, 1);
        assert_eq!(outcome.methods_redirected, 1);
        assert!(!outcome.native_code_dropped);
        assert!(module.is_modified());

        let slimmed = ManagedModule::from_mem(module.into_vec()).unwrap();
        let unused = &slimmed.types()[2];
        let compute = &unused.methods[2];
        let tiny = &unused.methods[3];
        assert_eq!(tiny.rva, compute.rva);
        assert!(MethodBody::is_stub(slimmed.body(compute.rva).unwrap()));

        let ctor = &unused.methods[0];
        assert!(!MethodBody::is_stub(slimmed.body(ctor.rva).unwrap()));

        let before = ManagedModule::from_mem(original).unwrap();
        for index in [1, 3, 5, 6] {
            assert_eq!(before.types()[index], slimmed.types()[index]);
        }
    }

    #[test]
    fn slim_twice_is_identical() {
        let mut module = ManagedModule::from_mem(sample()).unwrap();
        module.slim(&used(&["Demo.Used"])).unwrap();
        let once = module.into_vec();

        let mut again = ManagedModule::from_mem(once.clone()).unwrap();
        let outcome = again.slim(&used(&["Demo.Used"])).unwrap();
        assert!(!outcome.changed());
        assert!(!again.is_modified());
        assert_eq!(outcome.methods_already_stubbed, 2);
        assert_eq!(again.into_vec(), once);
    }

    fn tiny_bodies() -> Vec<u8> {
        TestImage::new("Small")
            .with_type(
                TestType::class("Demo", "Unused")
                    .with_method(TestMethod::new("A").with_code(&[0x2A]))
                    .with_method(TestMethod::new("B").with_code(&[0x00, 0x2A])),
            )
            .build()
    }

    #[test]
    fn tiny_bodies_share_stub_in_section_slack() {
        let image = tiny_bodies();
        let mut module = ManagedModule::from_mem(image.clone()).unwrap();
        let text_end = module.sections[0].virtual_size;

        let outcome = module.slim(&HashSet::new()).unwrap();
        assert_eq!(outcome.methods_stubbed, 0);
        assert_eq!(outcome.methods_redirected, 2);
        assert!(module.is_modified());

        let slimmed = ManagedModule::from_mem(module.into_vec()).unwrap();
        let methods = &slimmed.types()[1].methods;
        assert_eq!(methods[0].rva, methods[1].rva);
        assert_eq!(methods[0].rva, 0x2000 + text_end.next_multiple_of(4));
        assert!(MethodBody::is_stub(slimmed.body(methods[0].rva).unwrap()));
        assert_eq!(
            slimmed.sections[0].virtual_size,
            text_end.next_multiple_of(4) + STUB_BODY.len() as u32
        );

        let mut again = ManagedModule::from_mem(slimmed.data().to_vec()).unwrap();
        let outcome = again.slim(&HashSet::new()).unwrap();
        assert!(!outcome.changed());
        assert_eq!(outcome.methods_already_stubbed, 2);
        assert_ne!(slimmed.data(), image.as_slice());
    }

    #[test]
    fn tiny_bodies_without_slack_fail() {
        let mut image = tiny_bodies();
        let module = ManagedModule::from_mem(image.clone()).unwrap();
        let header = module.section_header_offset(0).unwrap();
        let raw_size = module.sections[0].size_of_raw_data;
        image[header + 8..header + 12].copy_from_slice(&raw_size.to_le_bytes());

        let mut module = ManagedModule::from_mem(image).unwrap();
        assert!(module.slim(&HashSet::new()).is_err());
    }

    #[test]
    fn ready_to_run_code_is_dropped_when_modified() {
        let image = TestImage::new("Precompiled")
            .ready_to_run()
            .with_type(
                TestType::class("Demo", "Unused")
                    .with_method(TestMethod::new("Work").with_fat_body(16)),
            )
            .build();

        let mut untouched = ManagedModule::from_mem(image.clone()).unwrap();
        assert!(untouched.is_ready_to_run());
        let outcome = untouched.slim(&used(&["Demo.Unused"])).unwrap();
        assert!(!outcome.native_code_dropped);
        assert_eq!(untouched.into_vec(), image);

        let mut module = ManagedModule::from_mem(image).unwrap();
        let outcome = module.slim(&HashSet::new()).unwrap();
        assert!(outcome.native_code_dropped);
        assert!(!module.is_ready_to_run());

        let offset = module.cor20_offset;
        let header = Cor20Header::read(&module.data()[offset..offset + 72]).unwrap();
        assert!(!header.is_ready_to_run());
        assert_eq!(header.managed_native_header_size, 0);
        assert_eq!(header.flags & Cor20Header::FLAG_IL_LIBRARY, 0);
        assert_eq!(header.flags & 0x1, 0x1);

        let reloaded = ManagedModule::from_mem(module.into_vec()).unwrap();
        assert!(!reloaded.is_ready_to_run());
    }

    #[test]
    fn shared_body_with_kept_method_is_redirected() {
        let image = TestImage::new("Shared")
            .with_type(TestType::class("Demo", "Kept").with_method(TestMethod::new("Run").with_fat_body(16)))
            .with_type(
                TestType::class("Demo", "Dropped")
                    .with_method(TestMethod::new("Alias").sharing_body_of(1))
                    .with_method(TestMethod::new("Work").with_fat_body(16)),
            )
            .build();
        let mut module = ManagedModule::from_mem(image).unwrap();

        let outcome = module.slim(&used(&["Demo.Kept"])).unwrap();
        assert_eq!(outcome.methods_stubbed, 1);
        assert_eq!(outcome.methods_redirected, 1);

        let slimmed = ManagedModule::from_mem(module.into_vec()).unwrap();
        let kept = &slimmed.types()[1].methods[0];
        assert!(!MethodBody::is_stub(slimmed.body(kept.rva).unwrap()));
        let alias = &slimmed.types()[2].methods[0];
        assert!(MethodBody::is_stub(slimmed.body(alias.rva).unwrap()));
        assert_ne!(alias.rva, kept.rva);
    }

    #[test]
    fn save_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sample.dll");
        std::fs::write(&path, sample()).unwrap();

        let mut module = ManagedModule::from_file(&path).unwrap();
        module.slim(&used(&["Demo.Used"])).unwrap();
        module.save().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), module.data());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(ManagedModule::from_mem(sample()).unwrap().save().is_err());
    }
}
