/// Build context assembly
///
/// Turns a validated request into a materialized context: dependency files,
/// sources, tests and a generated build script. Any filesystem failure aborts
/// before a build is attempted, and the half-written directory is dropped.
use crate::config::presets::EcosystemPreset;
use crate::config::settings::RunnerConfig;
use crate::config::types::Result;
use crate::context::script::{BuildScript, WORKDIR};
use crate::context::workspace::BuildContext;
use crate::validate::ValidatedRequest;

/// Build the script for a validated request without touching the filesystem
pub fn build_script(validated: &ValidatedRequest) -> Result<BuildScript> {
    let preset = validated.language.preset();
    let request = &validated.request;

    let mut script = BuildScript::from_image(preset.base_image)?;
    script.workdir(WORKDIR)?;

    // Manifests first so the install layer caches across source changes
    for manifest in cached_manifests(validated, preset) {
        script.copy(manifest)?;
    }
    if has_path(validated, preset.primary_manifest) {
        script.run(preset.install.command, preset.install.tolerate_failure)?;
    }

    for dep in &request.dependencies {
        if !preset.is_cache_manifest(&dep.path) {
            script.copy(&dep.path)?;
        }
    }
    for file in request.source_files.iter().chain(&request.test_files) {
        script.copy(&file.path)?;
    }

    script.shell_cmd(preset.command_for(request.custom_command.as_deref()))?;
    Ok(script)
}

/// Materialize the build context for a validated request
pub fn assemble(validated: &ValidatedRequest, config: &RunnerConfig) -> Result<BuildContext> {
    let script = build_script(validated)?;
    let request = &validated.request;

    let ctx = BuildContext::create(&config.context_root())?;

    for dep in &request.dependencies {
        ctx.write_file(&dep.path, dep.content.as_bytes())?;
    }
    // Tests are written last so a test file wins over a same-path source file
    for file in request.source_files.iter().chain(&request.test_files) {
        ctx.write_file(&file.path, file.content.as_bytes())?;
    }
    ctx.write_build_script(&script.render())?;

    log::debug!(
        "Assembled {} context {} ({} deps, {} sources, {} tests)",
        validated.language,
        ctx.id(),
        request.dependencies.len(),
        request.source_files.len(),
        request.test_files.len()
    );
    Ok(ctx)
}

/// Cache manifests present in the request, in preset order
fn cached_manifests<'a>(
    validated: &'a ValidatedRequest,
    preset: &'a EcosystemPreset,
) -> impl Iterator<Item = &'a str> + 'a {
    preset
        .cache_manifests
        .iter()
        .copied()
        .filter(move |m| has_path(validated, m))
}

fn has_path(validated: &ValidatedRequest, path: &str) -> bool {
    validated.request.dependencies.iter().any(|d| d.path == path)
}
