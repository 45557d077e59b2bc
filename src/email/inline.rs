use crate::error::MailError;
use crate::utils::error_chain;

/// Moves `<style>` rules onto the elements they match, since many mail
/// clients drop style blocks. Class attributes and `!important` markers are
/// kept; remote stylesheets are never fetched.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssInliner {
    keep_style_tags: bool,
}

impl CssInliner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave the original `<style>` blocks in place next to the inlined
    /// attributes.
    pub fn keep_style_tags(mut self, keep: bool) -> Self {
        self.keep_style_tags = keep;
        self
    }

    pub fn inline(&self, html: &str) -> Result<String, MailError> {
        let inliner = css_inline::CSSInliner::options()
            .load_remote_stylesheets(false)
            .keep_style_tags(self.keep_style_tags)
            .build();

        inliner
            .inline(html)
            .map_err(|e| MailError::CssTransformFailed(error_chain(&e)))
    }
}
