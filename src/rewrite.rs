use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::{ArtifactKey, ArtifactRegistry};
use crate::error::{PipelineError, PipelineResult};

/// What a rewritten manifest line points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceMode {
    /// The store identifier of the referenced artifact.
    #[default]
    Identifier,
    /// The artifact's plain filename.
    Filename,
}

/// True for tokens shaped like a store identifier (hyphenated UUID).
pub fn is_identifier(token: &str) -> bool {
    token.len() == 36 && Uuid::try_parse(token).is_ok()
}

pub struct PlaylistRewriter<'a> {
    base: &'a str,
    mode: ReferenceMode,
    prefixes: Vec<String>,
}

impl<'a> PlaylistRewriter<'a> {
    pub fn new(base: &'a str, mode: ReferenceMode, public_base_url: &str) -> Self {
        let mut prefixes = vec![
            format!("{}/assets/", public_base_url.trim_end_matches('/')),
            "/assets/".to_string(),
            "assets/".to_string(),
        ];
        prefixes.sort_by_key(|p| std::cmp::Reverse(p.len()));
        Self {
            base,
            mode,
            prefixes,
        }
    }

    /// Rewrites every reference line of `text`. Directive and blank lines,
    /// line endings and unresolvable references are kept as they are.
    pub fn rewrite(&self, text: &str, registry: &ArtifactRegistry) -> String {
        let mut out = String::with_capacity(text.len());
        for piece in text.split_inclusive('\n') {
            let (content, ending) = split_line_ending(piece);
            out.push_str(&self.rewrite_line(content, registry));
            out.push_str(ending);
        }
        out
    }

    fn rewrite_line(&self, line: &str, registry: &ArtifactRegistry) -> String {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return line.to_string();
        }

        let token = self.strip_prefix(trimmed);
        let token = token.split(['?', '#']).next().unwrap_or(token);

        if is_identifier(token) {
            return match self.mode {
                ReferenceMode::Identifier => line.to_string(),
                ReferenceMode::Filename => match registry.find_by_id(token) {
                    Some(file) => file.filename.clone(),
                    None => line.to_string(),
                },
            };
        }

        let key = ArtifactKey::parse(self.base, token).or_else(|| {
            token
                .rsplit('/')
                .next()
                .and_then(|last| ArtifactKey::parse(self.base, last))
        });

        match key.and_then(|k| registry.get(&k)) {
            Some(file) => match self.mode {
                ReferenceMode::Identifier => file.id.clone(),
                ReferenceMode::Filename => file.filename.clone(),
            },
            None => {
                warn!("Manifest reference {:?} has no published artifact, leaving it", trimmed);
                line.to_string()
            }
        }
    }

    fn strip_prefix<'t>(&self, token: &'t str) -> &'t str {
        self.prefixes
            .iter()
            .find_map(|p| token.strip_prefix(p.as_str()))
            .unwrap_or(token)
    }

    /// Rewrites a manifest file in place.
    pub async fn rewrite_file(&self, path: &Path, registry: &ArtifactRegistry) -> PipelineResult<()> {
        let original = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        let rewritten = self.rewrite(&original, registry);
        if rewritten == original {
            debug!("Manifest {:?} already up to date", path);
            return Ok(());
        }
        tokio::fs::write(path, rewritten)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        debug!("Rewrote manifest {:?}", path);
        Ok(())
    }
}

fn split_line_ending(piece: &str) -> (&str, &str) {
    if let Some(content) = piece.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = piece.strip_suffix('\n') {
        (content, "\n")
    } else {
        (piece, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::PublishedFile;

    const SEG0: &str = "0b7a6a52-1c1e-4f0e-9a57-2d3c8f1e0001";
    const SEG1: &str = "0b7a6a52-1c1e-4f0e-9a57-2d3c8f1e0002";
    const OTHER_SEG0: &str = "0b7a6a52-1c1e-4f0e-9a57-2d3c8f1e0003";

    fn registry() -> ArtifactRegistry {
        let mut registry = ArtifactRegistry::new();
        for (quality, index, name, id) in [
            (720, 0, "clip_720p_000.ts", SEG0),
            (720, 1, "clip_720p_001.ts", SEG1),
            (240, 0, "clip_240p_000.ts", OTHER_SEG0),
        ] {
            registry.insert(
                ArtifactKey::Segment { quality, index },
                PublishedFile {
                    filename: name.into(),
                    id: id.into(),
                },
            );
        }
        registry
    }

    const MANIFEST: &str = "#EXTM3U\n\
        #EXT-X-VERSION:3\n\
        #EXT-X-TARGETDURATION:4\n\
        #EXTINF:4.000000,\n\
        clip_720p_000.ts\n\
        \n\
        #EXTINF:2.500000,\n\
        /assets/clip_720p_001.ts\n\
        #EXT-X-ENDLIST\n";

    #[test]
    fn rewrites_references_to_identifiers() {
        let rewriter = PlaylistRewriter::new("clip", ReferenceMode::Identifier, "http://cms");
        let out = rewriter.rewrite(MANIFEST, &registry());
        let refs: Vec<&str> = out
            .lines()
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        assert_eq!(refs, vec![SEG0, SEG1]);
        assert!(out.contains("#EXT-X-TARGETDURATION:4\n"));
        assert!(out.contains("\n\n"));
        assert!(out.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn rewriting_twice_is_identity() {
        let rewriter = PlaylistRewriter::new("clip", ReferenceMode::Identifier, "http://cms");
        let once = rewriter.rewrite(MANIFEST, &registry());
        let twice = rewriter.rewrite(&once, &registry());
        assert_eq!(once, twice);
    }

    #[test]
    fn filename_mode_emits_filenames_and_is_stable() {
        let rewriter = PlaylistRewriter::new("clip", ReferenceMode::Filename, "http://cms");
        let out = rewriter.rewrite(MANIFEST, &registry());
        assert!(out.contains("\nclip_720p_001.ts\n"));
        assert!(!out.contains("/assets/"));
        assert_eq!(rewriter.rewrite(&out, &registry()), out);
    }

    #[test]
    fn filename_mode_reverts_identifiers() {
        let ids = PlaylistRewriter::new("clip", ReferenceMode::Identifier, "http://cms")
            .rewrite(MANIFEST, &registry());
        let names = PlaylistRewriter::new("clip", ReferenceMode::Filename, "http://cms")
            .rewrite(&ids, &registry());
        assert!(names.contains("\nclip_720p_000.ts\n"));
    }

    #[test]
    fn unknown_reference_is_kept_verbatim() {
        let rewriter = PlaylistRewriter::new("clip", ReferenceMode::Identifier, "http://cms");
        let text = "#EXTM3U\nclip_720p_009.ts\nsomething_else.ts\n";
        assert_eq!(rewriter.rewrite(text, &registry()), text);
    }

    #[test]
    fn public_url_prefix_and_query_are_stripped() {
        let rewriter = PlaylistRewriter::new("clip", ReferenceMode::Identifier, "https://cms.test/");
        let text = "https://cms.test/assets/clip_720p_000.ts?download\n";
        assert_eq!(rewriter.rewrite(text, &registry()), format!("{}\n", SEG0));
    }

    #[test]
    fn same_index_in_other_quality_does_not_collide() {
        let rewriter = PlaylistRewriter::new("clip", ReferenceMode::Identifier, "http://cms");
        let out = rewriter.rewrite("clip_240p_000.ts\nclip_720p_000.ts\n", &registry());
        assert_eq!(out, format!("{}\n{}\n", OTHER_SEG0, SEG0));
    }

    #[test]
    fn crlf_line_endings_survive() {
        let rewriter = PlaylistRewriter::new("clip", ReferenceMode::Identifier, "http://cms");
        let out = rewriter.rewrite("#EXTM3U\r\nclip_720p_000.ts\r\n", &registry());
        assert_eq!(out, format!("#EXTM3U\r\n{}\r\n", SEG0));
    }

    #[test]
    fn identifier_syntax() {
        assert!(is_identifier(SEG0));
        assert!(!is_identifier("clip_720p_000.ts"));
        assert!(!is_identifier("0b7a6a521c1e4f0e9a572d3c8f1e0001"));
    }
}
