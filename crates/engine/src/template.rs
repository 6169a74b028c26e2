//! Context templating for manifest strings.
//!
//! Manifests reference their own coordinates through a fixed token set so
//! they never need to know absolute paths.

use crate::plugin::PluginContext;

/// Substitutes the context tokens in `input`.
pub fn render(ctx: &PluginContext, version: &str, input: &str) -> String {
    input
        .replace("{{.Workspace}}", &ctx.workspace.display().to_string())
        .replace("{{.ResourcePath}}", &ctx.resource_path.display().to_string())
        .replace("{{.BinPath}}", &ctx.bin_path.display().to_string())
        .replace(
            "{{.CommandSourcePath}}",
            &ctx.command_source_path.display().to_string(),
        )
        .replace("{{.Version}}", version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context() -> PluginContext {
        PluginContext {
            path: PathBuf::from("/src/demo.yml"),
            sum: "abc".to_string(),
            workspace: PathBuf::from("/ws"),
            command_source_path: PathBuf::from("/src"),
            bin_path: PathBuf::from("/ws/.bin"),
            resource_path: PathBuf::from("/ws/.resource"),
            load_file: PathBuf::from("/ws/.load_info"),
        }
    }

    #[test]
    fn substitutes_every_token() {
        let out = render(
            &context(),
            "1.2.3",
            "{{.Workspace}} {{.ResourcePath}} {{.BinPath}} {{.CommandSourcePath}} {{.Version}}",
        );
        assert_eq!(out, "/ws /ws/.resource /ws/.bin /src 1.2.3");
    }

    #[test]
    fn unknown_tokens_are_left_alone() {
        let out = render(&context(), "v", "echo {{.Unknown}}");
        assert_eq!(out, "echo {{.Unknown}}");
    }
}
