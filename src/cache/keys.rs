//! Field-cache key scheme.

use crate::domain::types::RecordField;

/// Slot name for a record field: `<tex_key>:<field>`.
///
/// Tex keys never contain `:` (hex digest, tool names, version suffix), so
/// the scheme is unambiguous.
pub fn field_cache_key(tex_key: &str, field: RecordField) -> String {
    format!("{tex_key}:{}", field.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_names_are_distinct_per_field() {
        let image = field_cache_key("abc_latex_png_v1", RecordField::Image);
        let error = field_cache_key("abc_latex_png_v1", RecordField::CompileError);
        assert_eq!(image, "abc_latex_png_v1:image");
        assert_eq!(error, "abc_latex_png_v1:compile_error");
        assert_ne!(image, error);
    }
}
