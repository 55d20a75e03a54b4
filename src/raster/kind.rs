/// Image classification derived from an entry's file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Png,
    Jpeg,
    NotImage,
}

impl ImageKind {
    /// Classify by the extension of the last path segment.
    ///
    /// Matching ignores ASCII case; `jpg` is an alias of `jpeg`. Names
    /// without an extension and directory entries are not images.
    pub fn from_file_name(name: &str) -> Self {
        let base = name.rsplit('/').next().unwrap_or(name);
        let Some((_, ext)) = base.rsplit_once('.') else {
            return ImageKind::NotImage;
        };

        if ext.eq_ignore_ascii_case("png") {
            ImageKind::Png
        } else if ext.eq_ignore_ascii_case("jpeg") || ext.eq_ignore_ascii_case("jpg") {
            ImageKind::Jpeg
        } else {
            ImageKind::NotImage
        }
    }

    pub fn is_image(&self) -> bool {
        *self != ImageKind::NotImage
    }
}
