//! Compiler and converter registries.
//!
//! The toolchain is a closed table: four TeX engines, four converters, and a
//! fixed mapping from (engine, image format) to the converter that handles
//! it. Every compile routes through `latexmk` with shell-escape disabled,
//! non-interactive mode, and halt-on-error; the engine is selected with a
//! program-substitution flag carrying the engine's absolute binary path so
//! non-default TeX installations work.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use crate::config::RenderSettings;
use crate::domain::types::{CompiledFormat, ImageFormat, TexCompiler};

use super::command::{CommandError, run_command};

const LATEXMK_MIN_VERSION: (u64, u64, u64) = (4, 39, 0);
const LATEXMK_OPTIONS: &[&str] = &[
    "-latexoption=\"-no-shell-escape\"",
    "-interaction=nonstopmode",
    "-halt-on-error",
];

/// Converter implementations, keyed by (engine output, image format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageConverterKind {
    /// DVI → PNG.
    Dvipng,
    /// DVI → SVG.
    Dvisvgm,
    /// PDF → SVG, a crop-then-convert two-step sequence.
    Pdf2svg,
    /// PDF → PNG through ImageMagick, with density and margin trim.
    Magick,
}

impl ImageConverterKind {
    pub fn output_format(self) -> ImageFormat {
        match self {
            ImageConverterKind::Dvipng | ImageConverterKind::Magick => ImageFormat::Png,
            ImageConverterKind::Dvisvgm | ImageConverterKind::Pdf2svg => ImageFormat::Svg,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ImageConverterKind::Dvipng => "dvipng",
            ImageConverterKind::Dvisvgm => "dvisvgm",
            ImageConverterKind::Pdf2svg => "pdf2svg",
            ImageConverterKind::Magick => "magick",
        }
    }
}

/// Pick the converter for a supported (compiler, format) combination.
pub fn converter_for(compiler: TexCompiler, format: ImageFormat) -> ImageConverterKind {
    match (compiler.compiled_format(), format) {
        (CompiledFormat::Dvi, ImageFormat::Png) => ImageConverterKind::Dvipng,
        (CompiledFormat::Dvi, ImageFormat::Svg) => ImageConverterKind::Dvisvgm,
        (CompiledFormat::Pdf, ImageFormat::Png) => ImageConverterKind::Magick,
        (CompiledFormat::Pdf, ImageFormat::Svg) => ImageConverterKind::Pdf2svg,
    }
}

/// Resolved binary paths plus the conversion knobs shared by all runs.
#[derive(Debug, Clone)]
pub struct Toolchain {
    latexmk: PathBuf,
    latex: PathBuf,
    pdflatex: PathBuf,
    xelatex: PathBuf,
    lualatex: PathBuf,
    dvipng: PathBuf,
    dvisvgm: PathBuf,
    pdf2svg: PathBuf,
    pdfcrop: PathBuf,
    magick: PathBuf,
    png_density: u32,
    timeout: Duration,
}

impl Toolchain {
    /// Build the toolchain from settings, resolving bare tool names to
    /// absolute paths through `$PATH`. Unresolvable names are kept verbatim;
    /// [`Toolchain::doctor`] reports them as launch failures at startup.
    pub fn from_settings(render: &RenderSettings) -> Self {
        Self {
            latexmk: resolve_tool(&render.latexmk_path),
            latex: resolve_tool(&render.latex_path),
            pdflatex: resolve_tool(&render.pdflatex_path),
            xelatex: resolve_tool(&render.xelatex_path),
            lualatex: resolve_tool(&render.lualatex_path),
            dvipng: resolve_tool(&render.dvipng_path),
            dvisvgm: resolve_tool(&render.dvisvgm_path),
            pdf2svg: resolve_tool(&render.pdf2svg_path),
            pdfcrop: resolve_tool(&render.pdfcrop_path),
            magick: resolve_tool(&render.magick_path),
            png_density: render.png_density,
            timeout: render.timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn engine_path(&self, compiler: TexCompiler) -> &Path {
        match compiler {
            TexCompiler::Latex => &self.latex,
            TexCompiler::Pdflatex => &self.pdflatex,
            TexCompiler::Xelatex => &self.xelatex,
            TexCompiler::Lualatex => &self.lualatex,
        }
    }

    /// The `latexmk` invocation that compiles `tex_path` inside its
    /// workspace directory.
    pub fn compile_command(&self, compiler: TexCompiler, tex_path: &Path) -> ToolCommand {
        let mut args: Vec<OsString> = Vec::with_capacity(LATEXMK_OPTIONS.len() + 3);
        args.push(format!("-{}", compiler.compiled_format().extension()).into());
        args.push(engine_substitution(compiler, self.engine_path(compiler)));
        args.extend(LATEXMK_OPTIONS.iter().map(OsString::from));
        args.push(tex_path.as_os_str().to_owned());

        ToolCommand {
            program: self.latexmk.clone(),
            args,
        }
    }

    /// The command sequence converting `compiled_path` into `image_path`.
    /// Commands run in order; the first non-zero exit aborts the sequence.
    pub fn convert_commands(
        &self,
        kind: ImageConverterKind,
        compiled_path: &Path,
        image_path: &Path,
    ) -> Vec<ToolCommand> {
        match kind {
            ImageConverterKind::Dvipng => vec![ToolCommand {
                program: self.dvipng.clone(),
                args: vec![
                    "-o".into(),
                    image_path.into(),
                    "-pp".into(),
                    "1".into(),
                    "-T".into(),
                    "tight".into(),
                    "-z9".into(),
                    compiled_path.into(),
                ],
            }],
            ImageConverterKind::Dvisvgm => vec![ToolCommand {
                program: self.dvisvgm.clone(),
                args: vec![
                    "--no-fonts".into(),
                    "-o".into(),
                    image_path.into(),
                    compiled_path.into(),
                ],
            }],
            ImageConverterKind::Pdf2svg => vec![
                ToolCommand {
                    program: self.pdfcrop.clone(),
                    args: vec![compiled_path.into(), compiled_path.into()],
                },
                ToolCommand {
                    program: self.pdf2svg.clone(),
                    args: vec![compiled_path.into(), image_path.into()],
                },
            ],
            ImageConverterKind::Magick => vec![ToolCommand {
                program: self.magick.clone(),
                args: vec![
                    "-density".into(),
                    self.png_density.to_string().into(),
                    compiled_path.into(),
                    "-trim".into(),
                    "+repage".into(),
                    image_path.into(),
                ],
            }],
        }
    }

    /// Startup health check: every tool must launch, and tools with version
    /// bounds must report a parseable `major.minor[.patch]` inside them.
    /// A non-empty result gates process startup as a configuration error.
    pub fn doctor(&self) -> Vec<ToolchainCheckError> {
        let checks: &[(&str, &Path, Option<(u64, u64, u64)>, bool)] = &[
            ("latexmk", &self.latexmk, Some(LATEXMK_MIN_VERSION), false),
            ("latex", &self.latex, None, false),
            ("pdflatex", &self.pdflatex, None, false),
            ("xelatex", &self.xelatex, None, false),
            ("lualatex", &self.lualatex, None, false),
            ("dvipng", &self.dvipng, None, false),
            ("dvisvgm", &self.dvisvgm, None, false),
            // pdf2svg prints usage instead of a version string.
            ("pdf2svg", &self.pdf2svg, None, true),
            ("pdfcrop", &self.pdfcrop, None, false),
            ("magick", &self.magick, None, false),
        ];

        let mut errors = Vec::new();
        for &(name, path, min_version, skip_version_parse) in checks {
            if let Err(err) = check_tool(name, path, min_version, skip_version_parse, self.timeout)
            {
                errors.push(err);
            }
        }
        errors
    }
}

/// A ready-to-run external command.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

#[derive(Debug, Error)]
pub enum ToolchainCheckError {
    #[error("`{tool}` could not be run with `--version`; is it installed and on PATH? ({source})")]
    Unavailable {
        tool: &'static str,
        #[source]
        source: CommandError,
    },
    #[error("could not find a `major.minor[.patch]` version in `{tool} --version` output")]
    UnparseableVersion { tool: &'static str },
    #[error("`{tool}` version {found} is older than the required {required}")]
    VersionTooOld {
        tool: &'static str,
        found: String,
        required: String,
    },
}

fn check_tool(
    tool: &'static str,
    path: &Path,
    min_version: Option<(u64, u64, u64)>,
    skip_version_parse: bool,
    timeout: Duration,
) -> Result<(), ToolchainCheckError> {
    let output = run_command(path, &["--version".into()], None, timeout)
        .map_err(|source| ToolchainCheckError::Unavailable { tool, source })?;

    if skip_version_parse {
        return Ok(());
    }

    let combined = format!("{}\n{}", output.stdout, output.stderr);
    let found = parse_version(&combined)
        .ok_or(ToolchainCheckError::UnparseableVersion { tool })?;

    if let Some(required) = min_version {
        if found < required {
            return Err(ToolchainCheckError::VersionTooOld {
                tool,
                found: format_version(found),
                required: format_version(required),
            });
        }
    }

    Ok(())
}

fn engine_substitution(compiler: TexCompiler, engine_path: &Path) -> OsString {
    // xelatex and lualatex are handed to latexmk through the -pdflatex slot,
    // matching how latexmk selects alternative PDF engines.
    let flag = match compiler {
        TexCompiler::Latex => "-latex=",
        TexCompiler::Pdflatex | TexCompiler::Xelatex | TexCompiler::Lualatex => "-pdflatex=",
    };
    let mut arg = OsString::from(flag);
    arg.push(engine_path.as_os_str());
    arg
}

fn resolve_tool(configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        return configured.to_path_buf();
    }
    which::which(configured).unwrap_or_else(|_| configured.to_path_buf())
}

/// Find the first `major.minor[.patch]` sequence in free-form version text.
fn parse_version(text: &str) -> Option<(u64, u64, u64)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let (major, next) = take_number(bytes, i)?;
            if next < bytes.len() && bytes[next] == b'.' && bytes.get(next + 1).is_some_and(u8::is_ascii_digit) {
                let (minor, after_minor) = take_number(bytes, next + 1)?;
                let patch = if after_minor < bytes.len()
                    && bytes[after_minor] == b'.'
                    && bytes.get(after_minor + 1).is_some_and(u8::is_ascii_digit)
                {
                    take_number(bytes, after_minor + 1)?.0
                } else {
                    0
                };
                return Some((major, minor, patch));
            }
            i = next;
        }
        i += 1;
    }
    None
}

fn take_number(bytes: &[u8], start: usize) -> Option<(u64, usize)> {
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    std::str::from_utf8(&bytes[start..end])
        .ok()?
        .parse()
        .ok()
        .map(|value| (value, end))
}

fn format_version((major, minor, patch): (u64, u64, u64)) -> String {
    format!("{major}.{minor}.{patch}")
}
