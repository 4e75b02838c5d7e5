//! The compile-then-convert pipeline.
//!
//! A render is a straight-line sequence inside a throwaway workspace: write
//! `<tex_key>.tex`, compile it with `latexmk`, convert the DVI/PDF into the
//! requested image format, then read the single page back as bytes plus a
//! base64 data URL. Every failure mode is a distinct [`RenderError`] variant
//! so callers can tell a bad document from a broken toolchain.

use std::{
    fs,
    path::{Path, PathBuf},
};

use base64::Engine as _;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RenderSettings;
use crate::domain::types::{ImageFormat, TexCompiler};

use super::command::{CommandError, run_command};
use super::log::abstract_latex_log;
use super::toolchain::{ToolCommand, Toolchain, converter_for};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("could not prepare render workspace")]
    Workspace(#[source] std::io::Error),
    #[error("`{program}` failed to run")]
    Tool {
        program: String,
        #[source]
        source: CommandError,
    },
    #[error("rendering timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("latex compilation failed")]
    LatexCompile { log: String },
    #[error("compilation produced no {expected} output: {detail}")]
    UnknownCompile {
        expected: &'static str,
        detail: String,
    },
    #[error("image conversion failed: {detail}")]
    ImageConvert { detail: String },
}

impl RenderError {
    /// True when the failure is a missing or non-executable tool rather
    /// than a problem with the document.
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, RenderError::Tool { source, .. } if source.is_launch_failure())
    }

    /// The error text to persist on the record, when this failure is the
    /// document's fault and therefore worth remembering.
    pub fn compile_error(&self) -> Option<&str> {
        match self {
            RenderError::LatexCompile { log } => Some(log),
            RenderError::UnknownCompile { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

/// A successfully rendered single-page image.
#[derive(Debug)]
pub struct RenderedImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub data_url: String,
}

pub struct Renderer {
    toolchain: Toolchain,
    keep_workspace: bool,
    debug_source_dir: PathBuf,
}

impl Renderer {
    pub fn from_settings(render: &RenderSettings) -> Self {
        Self {
            toolchain: Toolchain::from_settings(render),
            keep_workspace: render.keep_workspace,
            debug_source_dir: render.debug_source_dir.clone(),
        }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Render `tex_source` to a single image. Blocking; run on a blocking
    /// thread from async contexts.
    pub fn render(
        &self,
        tex_key: &str,
        tex_source: &str,
        compiler: TexCompiler,
        format: ImageFormat,
    ) -> Result<RenderedImage, RenderError> {
        let workspace = tempfile::tempdir().map_err(RenderError::Workspace)?;
        let result = self.render_in(workspace.path(), tex_key, tex_source, compiler, format);

        if self.keep_workspace {
            self.preserve_workspace(workspace, tex_key);
        }
        result
    }

    fn render_in(
        &self,
        dir: &Path,
        tex_key: &str,
        tex_source: &str,
        compiler: TexCompiler,
        format: ImageFormat,
    ) -> Result<RenderedImage, RenderError> {
        let tex_path = dir.join(format!("{tex_key}.tex"));
        fs::write(&tex_path, tex_source).map_err(RenderError::Workspace)?;

        let compile = self.toolchain.compile_command(compiler, &tex_path);
        let output = self.run(&compile, dir)?;

        let compiled_ext = compiler.compiled_format().extension();
        if !output.success() {
            return Err(RenderError::LatexCompile {
                log: self.compile_failure_log(dir, tex_key, &output.stdout, &output.stderr),
            });
        }

        let compiled_path = dir.join(format!("{tex_key}.{compiled_ext}"));
        if !compiled_path.is_file() {
            return Err(RenderError::UnknownCompile {
                expected: compiled_ext,
                detail: combine_streams(&output.stdout, &output.stderr),
            });
        }

        let kind = converter_for(compiler, format);
        let image_path = dir.join(format!("{tex_key}.{}", format.extension()));
        for command in self.toolchain.convert_commands(kind, &compiled_path, &image_path) {
            let output = self.run(&command, dir)?;
            if !output.success() {
                return Err(RenderError::ImageConvert {
                    detail: combine_streams(&output.stdout, &output.stderr),
                });
            }
        }

        let pages = collect_pages(dir, tex_key, format.extension())
            .map_err(RenderError::Workspace)?;
        let page = match pages.len() {
            0 => {
                return Err(RenderError::ImageConvert {
                    detail: "no image was generated".into(),
                });
            }
            1 => &pages[0],
            n => {
                return Err(RenderError::ImageConvert {
                    detail: format!(
                        "{n} images were generated while expecting 1, \
                         possibly due to a long tex source"
                    ),
                });
            }
        };

        let bytes = fs::read(page).map_err(RenderError::Workspace)?;
        let file_name = format!("{tex_key}.{}", format.extension());
        let data_url = data_url_for(&file_name, &bytes);

        debug!(tex_key, size = bytes.len(), "rendered image");
        Ok(RenderedImage {
            file_name,
            bytes,
            data_url,
        })
    }

    fn run(
        &self,
        command: &ToolCommand,
        cwd: &Path,
    ) -> Result<super::command::CommandOutput, RenderError> {
        run_command(&command.program, &command.args, Some(cwd), self.toolchain.timeout()).map_err(
            |err| match err {
                CommandError::Timeout { timeout_secs, .. } => RenderError::Timeout {
                    seconds: timeout_secs,
                },
                other => RenderError::Tool {
                    program: command.program.display().to_string(),
                    source: other,
                },
            },
        )
    }

    /// Prefer the abstracted `.log` file; fall back to the process streams
    /// when the engine died before writing one.
    fn compile_failure_log(&self, dir: &Path, tex_key: &str, stdout: &str, stderr: &str) -> String {
        let log_path = dir.join(format!("{tex_key}.log"));
        match fs::read_to_string(&log_path) {
            Ok(log) => abstract_latex_log(&log),
            Err(_) => combine_streams(stdout, stderr),
        }
    }

    fn preserve_workspace(&self, workspace: tempfile::TempDir, tex_key: &str) {
        let source = workspace.path().join(format!("{tex_key}.tex"));
        if let Err(err) = fs::create_dir_all(&self.debug_source_dir).and_then(|()| {
            fs::copy(&source, self.debug_source_dir.join(format!("{tex_key}.tex"))).map(|_| ())
        }) {
            warn!(error = %err, tex_key, "failed to save debug copy of tex source");
        }
        let kept = workspace.keep();
        debug!(path = %kept.display(), tex_key, "kept render workspace");
    }
}

/// Files belonging to this render's output: `stem.ext` plus any numbered
/// siblings `stem-N.ext` a multi-page document leaves behind.
fn collect_pages(dir: &Path, stem: &str, ext: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut pages = Vec::new();
    let single = dir.join(format!("{stem}.{ext}"));
    if single.is_file() {
        pages.push(single);
    }

    let prefix = format!("{stem}-");
    let suffix = format!(".{ext}");
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(middle) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
        {
            if !middle.is_empty() && middle.bytes().all(|b| b.is_ascii_digit()) {
                pages.push(entry.path());
            }
        }
    }
    pages.sort();
    Ok(pages)
}

fn data_url_for(file_name: &str, bytes: &[u8]) -> String {
    let mime = mime_guess::from_path(file_name).first_or_octet_stream();
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{payload}")
}

fn combine_streams(stdout: &str, stderr: &str) -> String {
    let mut combined = stderr.trim().to_string();
    let stdout = stdout.trim();
    if combined.is_empty() {
        combined = stdout.to_string();
    }
    combined
}
