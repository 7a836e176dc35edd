use hook_common::{
    EntryPoint, Primitives,
    primitives::{
        CallSurface, FileCreateRequest, HandleOutcome, IoStatus, MapViewOutcome, MapViewRequest,
        SectionCreateExRequest, SectionCreateRequest, SetInformationRequest, WriteRequest,
    },
};
use tracer_core::pdk::{ConfigError, HookContext, ModuleConfig};

pub const MODULE_NAME: &str = "file-system-monitor";

/// Entry points redirected to this module.
pub const ENTRY_POINTS: [EntryPoint; 8] = [
    EntryPoint::FileOpenOrCreate,
    EntryPoint::FileWrite,
    EntryPoint::FileWriteAlias,
    EntryPoint::SectionCreate,
    EntryPoint::SectionCreateAlias,
    EntryPoint::SectionCreateExtended,
    EntryPoint::SectionMapView,
    EntryPoint::FileSetInformation,
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// Report writable views of file-backed sections.
    track_section_writes: bool,
}

impl TryFrom<&ModuleConfig> for Config {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            track_section_writes: config.flag("track_section_writes", false)?,
        })
    }
}

/// File open or creation. The handle is resolved once the original returned
/// it; opens of the controller channel are never reported.
pub fn create_file<P: Primitives + ?Sized>(
    ctx: &HookContext,
    original: &P,
    request: &FileCreateRequest,
) -> HandleOutcome {
    let outcome = original.create_file(request);
    let reporter = ctx.reporter();
    if !outcome.status.is_success() || outcome.handle.is_null() || !reporter.is_reporting() {
        return outcome;
    }
    if reporter.is_channel(&request.object_name) {
        return outcome;
    }

    let name = ctx
        .resolver()
        .object_name(outcome.handle)
        .filter(|name| !name.is_empty())
        .or_else(|| Some(request.object_name.clone()).filter(|name| !name.is_empty()));
    match name {
        Some(name) if !reporter.is_channel(&name) => reporter.hook(
            EntryPoint::FileOpenOrCreate,
            format!("[DesiredAccess] {}, [FileName] {name}", request.desired_access),
        ),
        _ => {}
    }
    outcome
}

/// Write to an open handle, through either call surface.
pub fn write_file<P: Primitives + ?Sized>(
    ctx: &HookContext,
    original: &P,
    surface: CallSurface,
    request: &WriteRequest<'_>,
) -> IoStatus {
    let status = original.write_file(surface, request);
    let reporter = ctx.reporter();
    if !reporter.is_reporting() {
        return status;
    }

    let length = request.data.len();
    let message = match ctx.resolver().object_name(request.handle) {
        Some(name) if reporter.is_channel(&name) => return status,
        Some(name) if !name.is_empty() => format!("[Length] {length}, [FileName] {name}"),
        _ => format!("[Length] {length}"),
    };
    reporter.hook(surface.write_entry_point(), message);
    status
}

pub fn set_information_file<P: Primitives + ?Sized>(
    ctx: &HookContext,
    original: &P,
    request: &SetInformationRequest<'_>,
) -> IoStatus {
    let status = original.set_information_file(request);
    let reporter = ctx.reporter();
    if !reporter.is_reporting() {
        return status;
    }

    let class = request.class;
    let message = match ctx.resolver().object_name(request.handle) {
        Some(name) if reporter.is_channel(&name) => return status,
        Some(name) if !name.is_empty() => format!("[InformationClass] {class}, [FileName] {name}"),
        _ => format!("[InformationClass] {class}"),
    };
    reporter.hook(EntryPoint::FileSetInformation, message);
    status
}

pub fn create_section<P: Primitives + ?Sized>(
    original: &P,
    surface: CallSurface,
    request: &SectionCreateRequest,
) -> HandleOutcome {
    original.create_section(surface, request)
}

pub fn create_section_ex<P: Primitives + ?Sized>(
    original: &P,
    request: &SectionCreateExRequest,
) -> HandleOutcome {
    original.create_section_ex(request)
}

/// View mapping. With `track_section_writes` set, writable views of
/// file-backed sections are reported. The outcome is never altered.
pub fn map_view_of_section<P: Primitives + ?Sized>(
    ctx: &HookContext,
    config: &Config,
    original: &P,
    request: &MapViewRequest,
) -> MapViewOutcome {
    let outcome = original.map_view_of_section(request);
    let reporter = ctx.reporter();
    if !config.track_section_writes
        || !outcome.status.is_success()
        || !request.protection.is_writable()
        || !reporter.is_reporting()
    {
        return outcome;
    }

    if let Some(name) = ctx
        .resolver()
        .mapped_file_name(request.process, outcome.base_address)
        .filter(|name| !reporter.is_channel(name))
    {
        reporter.hook(
            EntryPoint::SectionMapView,
            format!(
                "[Protection] {:#x}, [FileName] {name}",
                request.protection.bits()
            ),
        );
    }
    outcome
}
