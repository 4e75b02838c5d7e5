//! Closed enumerations for the compile toolchain and record projection.
//!
//! The set of supported engines, output formats, and their pairings is fixed
//! at compile time; requests outside the combination table are rejected
//! before any subprocess is spawned.

use serde::{Deserialize, Serialize};

/// TeX engine used for the compile step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TexCompiler {
    Latex,
    Pdflatex,
    Xelatex,
    Lualatex,
}

impl TexCompiler {
    pub fn as_str(self) -> &'static str {
        match self {
            TexCompiler::Latex => "latex",
            TexCompiler::Pdflatex => "pdflatex",
            TexCompiler::Xelatex => "xelatex",
            TexCompiler::Lualatex => "lualatex",
        }
    }

    /// Container format produced by the engine before image conversion.
    pub fn compiled_format(self) -> CompiledFormat {
        match self {
            TexCompiler::Latex => CompiledFormat::Dvi,
            TexCompiler::Pdflatex | TexCompiler::Xelatex | TexCompiler::Lualatex => {
                CompiledFormat::Pdf
            }
        }
    }
}

impl std::fmt::Display for TexCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intermediate file format emitted by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompiledFormat {
    Dvi,
    Pdf,
}

impl CompiledFormat {
    pub fn extension(self) -> &'static str {
        match self {
            CompiledFormat::Dvi => "dvi",
            CompiledFormat::Pdf => "pdf",
        }
    }
}

/// Final image format returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Svg,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Svg => "svg",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed table of supported (compiler, format) pairings.
pub const ALLOWED_COMBINATIONS: &[(TexCompiler, ImageFormat)] = &[
    (TexCompiler::Latex, ImageFormat::Png),
    (TexCompiler::Latex, ImageFormat::Svg),
    (TexCompiler::Pdflatex, ImageFormat::Png),
    (TexCompiler::Pdflatex, ImageFormat::Svg),
    (TexCompiler::Xelatex, ImageFormat::Png),
    (TexCompiler::Xelatex, ImageFormat::Svg),
    (TexCompiler::Lualatex, ImageFormat::Png),
    (TexCompiler::Lualatex, ImageFormat::Svg),
];

pub fn combination_allowed(compiler: TexCompiler, format: ImageFormat) -> bool {
    ALLOWED_COMBINATIONS
        .iter()
        .any(|&(c, f)| c == compiler && f == format)
}

/// Dvipng misrenders TikZ/PGF picture environments, so the plain-latex PNG
/// path is silently upgraded to SVG when the source contains one.
pub fn effective_format(
    compiler: TexCompiler,
    format: ImageFormat,
    tex_source: &str,
) -> ImageFormat {
    if compiler == TexCompiler::Latex
        && format == ImageFormat::Png
        && contains_tikz_environment(tex_source)
    {
        return ImageFormat::Svg;
    }
    format
}

fn contains_tikz_environment(tex_source: &str) -> bool {
    tex_source.contains("\\begin{tikzpicture}") || tex_source.contains("\\begin{pgfpicture}")
}

/// Projectable fields of a persisted image record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    TexKey,
    CreationTime,
    DataUrl,
    Image,
    CompileError,
    Creator,
}

impl RecordField {
    pub const ALL: &[RecordField] = &[
        RecordField::TexKey,
        RecordField::CreationTime,
        RecordField::DataUrl,
        RecordField::Image,
        RecordField::CompileError,
        RecordField::Creator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordField::TexKey => "tex_key",
            RecordField::CreationTime => "creation_time",
            RecordField::DataUrl => "data_url",
            RecordField::Image => "image",
            RecordField::CompileError => "compile_error",
            RecordField::Creator => "creator",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        RecordField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == name)
    }
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
