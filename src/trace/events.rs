//! Classification of runtime events into usage facts.
//!
//! Only a handful of events emitted by the runtime provider (and its rundown companion)
//! carry information about which modules were opened and which types were loaded. Their
//! payloads are decoded here into [`TraceRecord`]s; every other event maps to `None`.

use strum::{Display, EnumCount, EnumIter};

use crate::{file::parser::Parser, Result};

/// Built-in runtime event source
pub const RUNTIME_PROVIDER: &str = "Microsoft-Windows-DotNETRuntime";
/// Rundown companion provider, emitted when the session closes
pub const RUNDOWN_PROVIDER: &str = "Microsoft-Windows-DotNETRuntimeRundown";

/// Runtime provider event ids
mod runtime {
    pub const BULK_TYPE: u32 = 15;
    pub const TYPE_LOAD_STOP: u32 = 74;
    pub const DOMAIN_MODULE_LOAD: u32 = 151;
    pub const MODULE_LOAD: u32 = 152;
    pub const MODULE_UNLOAD: u32 = 153;
    pub const R2R_GET_ENTRY_POINT: u32 = 159;
    pub const RESOLUTION_ATTEMPTED: u32 = 292;
    pub const KNOWN_PATH_PROBED: u32 = 296;
}

/// Rundown provider event ids
mod rundown {
    pub const DOMAIN_MODULE_DC_START: u32 = 151;
    pub const DOMAIN_MODULE_DC_END: u32 = 152;
    pub const MODULE_DC_START: u32 = 153;
    pub const MODULE_DC_END: u32 = 154;
}

/// The kind of a [`TraceRecord`], used for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
#[strum(serialize_all = "kebab-case")]
pub enum RecordKind {
    /// A probed module path
    ModuleProbe,
    /// The path an assembly resolution ended on
    ResolutionResult,
    /// A module load, unload or rundown
    ModuleLoad,
    /// A finished type load
    TypeLoad,
    /// A batch of type descriptions
    BulkType,
    /// A ReadyToRun entry point lookup
    EntryPoint,
}

/// A usage fact extracted from one runtime event.
///
/// Strings are passed on as decoded; blank values are filtered when the record is applied
/// to a [`crate::trace::Usage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    /// `KnownPathProbed`: the probed file path
    ModuleProbe(String),
    /// `ResolutionAttempted`: the resulting assembly path
    ResolutionResult(String),
    /// Module load/unload and rundown: the IL image path
    ModuleLoad(String),
    /// `TypeLoadStop`: the loaded type name
    TypeLoad(String),
    /// `BulkType`: the name of every entry in the batch
    BulkType(Vec<String>),
    /// `R2RGetEntryPoint`: the namespace of the method, which names its declaring type
    EntryPoint(String),
}

impl TraceRecord {
    /// Classify an event, decoding its payload when the event carries usage facts.
    ///
    /// Provider names compare case-insensitively. Events that are not recognized return
    /// `Ok(None)` without looking at the payload.
    ///
    /// ## Arguments
    /// * 'provider' - The provider name from the event metadata
    /// * 'event_id' - The event id from the event metadata
    /// * 'payload'  - The raw event payload
    ///
    /// # Errors
    /// Returns an error if a recognized event has a truncated payload.
    pub fn decode(provider: &str, event_id: u32, payload: &[u8]) -> Result<Option<TraceRecord>> {
        let mut parser = Parser::new(payload);

        if provider.eq_ignore_ascii_case(RUNTIME_PROVIDER) {
            let record = match event_id {
                runtime::KNOWN_PATH_PROBED => {
                    parser.read_le::<u16>()?; // ClrInstanceID
                    TraceRecord::ModuleProbe(parser.read_utf16z()?)
                }
                runtime::RESOLUTION_ATTEMPTED => {
                    TraceRecord::ResolutionResult(read_resolution_path(&mut parser)?)
                }
                runtime::MODULE_LOAD | runtime::MODULE_UNLOAD => {
                    TraceRecord::ModuleLoad(read_module_path(&mut parser, false)?)
                }
                runtime::DOMAIN_MODULE_LOAD => {
                    TraceRecord::ModuleLoad(read_module_path(&mut parser, true)?)
                }
                runtime::TYPE_LOAD_STOP => TraceRecord::TypeLoad(read_type_load(&mut parser)?),
                runtime::BULK_TYPE => TraceRecord::BulkType(read_bulk_type(&mut parser)?),
                runtime::R2R_GET_ENTRY_POINT => {
                    parser.read_le::<u64>()?;
                    TraceRecord::EntryPoint(parser.read_utf16z()?)
                }
                _ => return Ok(None),
            };
            return Ok(Some(record));
        }

        if provider.eq_ignore_ascii_case(RUNDOWN_PROVIDER) {
            let record = match event_id {
                rundown::MODULE_DC_START | rundown::MODULE_DC_END => {
                    TraceRecord::ModuleLoad(read_module_path(&mut parser, false)?)
                }
                rundown::DOMAIN_MODULE_DC_START | rundown::DOMAIN_MODULE_DC_END => {
                    TraceRecord::ModuleLoad(read_module_path(&mut parser, true)?)
                }
                _ => return Ok(None),
            };
            return Ok(Some(record));
        }

        Ok(None)
    }

    /// The kind of this record
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            TraceRecord::ModuleProbe(_) => RecordKind::ModuleProbe,
            TraceRecord::ResolutionResult(_) => RecordKind::ResolutionResult,
            TraceRecord::ModuleLoad(_) => RecordKind::ModuleLoad,
            TraceRecord::TypeLoad(_) => RecordKind::TypeLoad,
            TraceRecord::BulkType(_) => RecordKind::BulkType,
            TraceRecord::EntryPoint(_) => RecordKind::EntryPoint,
        }
    }
}

/// `ModuleID, AssemblyID, [AppDomainID,] ModuleFlags, Reserved1, ModuleILPath, ...`
fn read_module_path(parser: &mut Parser, has_domain: bool) -> Result<String> {
    parser.read_le::<u64>()?;
    parser.read_le::<u64>()?;
    if has_domain {
        parser.read_le::<u64>()?;
    }
    parser.read_le::<u32>()?;
    parser.read_le::<u32>()?;
    parser.read_utf16z()
}

/// `ClrInstanceID, AssemblyName, Stage, AssemblyLoadContext, Result, ResultAssemblyName,
/// ResultAssemblyPath, ...`
fn read_resolution_path(parser: &mut Parser) -> Result<String> {
    parser.read_le::<u16>()?;
    parser.read_utf16z()?;
    parser.read_le::<u16>()?;
    parser.read_utf16z()?;
    parser.read_le::<u16>()?;
    parser.read_utf16z()?;
    parser.read_utf16z()
}

/// `TypeLoadStartID, ClrInstanceID, LoadLevel, TypeID, TypeName, ...`
fn read_type_load(parser: &mut Parser) -> Result<String> {
    parser.read_le::<u32>()?;
    parser.read_le::<u16>()?;
    parser.read_le::<u16>()?;
    parser.read_le::<u64>()?;
    parser.read_utf16z()
}

fn read_bulk_type(parser: &mut Parser) -> Result<Vec<String>> {
    let count = parser.read_le::<u32>()?;
    parser.read_le::<u16>()?;

    // Each entry is at least 31 bytes, which bounds the allocation on corrupt counts
    let mut names = Vec::with_capacity((count as usize).min(parser.remaining() / 31));
    for _ in 0..count {
        parser.read_le::<u64>()?; // TypeID
        parser.read_le::<u64>()?; // ModuleID
        parser.read_le::<u32>()?; // TypeNameID
        parser.read_le::<u32>()?; // Flags
        parser.read_le::<u8>()?; // CorElementType
        names.push(parser.read_utf16z()?);

        let parameters = parser.read_le::<u32>()?;
        let skip = (parameters as usize)
            .checked_mul(8)
            .ok_or_else(|| malformed_error!("Invalid type parameter count - {}", parameters))?;
        parser.advance_by(skip)?;
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;
    use crate::test::TestPayload;

    #[test]
    fn module_events() {
        let payload = TestPayload::module_load("/app/A.dll");
        for id in [152, 153] {
            assert_eq!(
                TraceRecord::decode(RUNTIME_PROVIDER, id, &payload).unwrap(),
                Some(TraceRecord::ModuleLoad("/app/A.dll".into()))
            );
        }
        for id in [153, 154] {
            assert_eq!(
                TraceRecord::decode(RUNDOWN_PROVIDER, id, &payload).unwrap(),
                Some(TraceRecord::ModuleLoad("/app/A.dll".into()))
            );
        }

        let payload = TestPayload::domain_module_load("/app/B.dll");
        assert_eq!(
            TraceRecord::decode(RUNTIME_PROVIDER, 151, &payload).unwrap(),
            Some(TraceRecord::ModuleLoad("/app/B.dll".into()))
        );
        for id in [151, 152] {
            assert_eq!(
                TraceRecord::decode(RUNDOWN_PROVIDER, id, &payload).unwrap(),
                Some(TraceRecord::ModuleLoad("/app/B.dll".into()))
            );
        }
    }

    #[test]
    fn probe_and_resolution() {
        let payload = TestPayload::known_path_probed("/app/C.dll");
        assert_eq!(
            TraceRecord::decode(RUNTIME_PROVIDER, 296, &payload).unwrap(),
            Some(TraceRecord::ModuleProbe("/app/C.dll".into()))
        );

        let payload = TestPayload::resolution_attempted("C", "/app/C.dll");
        assert_eq!(
            TraceRecord::decode(RUNTIME_PROVIDER, 292, &payload).unwrap(),
            Some(TraceRecord::ResolutionResult("/app/C.dll".into()))
        );

        let payload = TestPayload::resolution_attempted("Missing", "");
        assert_eq!(
            TraceRecord::decode(RUNTIME_PROVIDER, 292, &payload).unwrap(),
            Some(TraceRecord::ResolutionResult(String::new()))
        );
    }

    #[test]
    fn path_events_skip_instance_id() {
        let wide = |text: &str| -> Vec<u8> {
            text.encode_utf16()
                .chain(std::iter::once(0))
                .flat_map(u16::to_le_bytes)
                .collect()
        };

        // ClrInstanceID, FilePath, Source, Result
        let mut payload = vec![0, 0];
        payload.extend(wide("/app/A.dll"));
        payload.extend(1u16.to_le_bytes());
        payload.extend(0i32.to_le_bytes());
        assert_eq!(
            TraceRecord::decode(RUNTIME_PROVIDER, 296, &payload).unwrap(),
            Some(TraceRecord::ModuleProbe("/app/A.dll".into()))
        );

        // ClrInstanceID, AssemblyName, Stage, AssemblyLoadContext, Result,
        // ResultAssemblyName, ResultAssemblyPath, ErrorMessage
        let mut payload = vec![0, 0];
        payload.extend(wide("A"));
        payload.extend(0u16.to_le_bytes());
        payload.extend(wide("Default"));
        payload.extend(0u16.to_le_bytes());
        payload.extend(wide("A, Version=1.0.0.0"));
        payload.extend(wide("/app/A.dll"));
        payload.extend(wide(""));
        assert_eq!(
            TraceRecord::decode(RUNTIME_PROVIDER, 292, &payload).unwrap(),
            Some(TraceRecord::ResolutionResult("/app/A.dll".into()))
        );
    }

    #[test]
    fn type_events() {
        let payload = TestPayload::type_load_stop("App.Used");
        assert_eq!(
            TraceRecord::decode(RUNTIME_PROVIDER, 74, &payload).unwrap(),
            Some(TraceRecord::TypeLoad("App.Used".into()))
        );

        let payload = TestPayload::bulk_type(&["App.First", "App.Second", "App.Third"]);
        assert_eq!(
            TraceRecord::decode(RUNTIME_PROVIDER, 15, &payload).unwrap(),
            Some(TraceRecord::BulkType(vec![
                "App.First".into(),
                "App.Second".into(),
                "App.Third".into()
            ]))
        );

        let payload = TestPayload::r2r_entry_point("App.Program", "Main");
        assert_eq!(
            TraceRecord::decode(RUNTIME_PROVIDER, 159, &payload).unwrap(),
            Some(TraceRecord::EntryPoint("App.Program".into()))
        );
    }

    #[test]
    fn provider_is_case_insensitive() {
        let payload = TestPayload::type_load_stop("App.Used");
        assert!(TraceRecord::decode("microsoft-windows-dotnetruntime", 74, &payload)
            .unwrap()
            .is_some());
    }

    #[test]
    fn unrelated_events() {
        assert_eq!(TraceRecord::decode(RUNTIME_PROVIDER, 1, &[]).unwrap(), None);
        assert_eq!(TraceRecord::decode(RUNDOWN_PROVIDER, 74, &[]).unwrap(), None);
        assert_eq!(TraceRecord::decode("Other-Provider", 152, &[]).unwrap(), None);
    }

    #[test]
    fn truncated_payload() {
        let payload = TestPayload::module_load("/app/A.dll");
        assert!(TraceRecord::decode(RUNTIME_PROVIDER, 152, &payload[..20]).is_err());

        let mut payload = TestPayload::bulk_type(&["App.First"]);
        payload.truncate(payload.len() - 2);
        assert!(TraceRecord::decode(RUNTIME_PROVIDER, 15, &payload).is_err());
    }

    #[test]
    fn kinds() {
        assert_eq!(RecordKind::iter().count(), RecordKind::COUNT);
        assert_eq!(RecordKind::ResolutionResult.to_string(), "resolution-result");
        assert_eq!(
            TraceRecord::BulkType(Vec::new()).kind(),
            RecordKind::BulkType
        );
    }
}
