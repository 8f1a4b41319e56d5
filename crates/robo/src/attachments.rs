use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;

use crate::errors::{ConversationError, ConversationResult};
use crate::models::content::ContentBlock;
use crate::models::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Document,
}

/// Where an attachment's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// A file to attach to a user message: media type, contents and kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub media_type: String,
    pub data: FileData,
    pub kind: FileKind,
}

impl FileSpec {
    pub fn new(media_type: impl Into<String>, data: FileData, kind: FileKind) -> Self {
        FileSpec {
            media_type: media_type.into(),
            data,
            kind,
        }
    }

    pub fn image(media_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(media_type, FileData::Bytes(bytes.into()), FileKind::Image)
    }

    pub fn document(media_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(media_type, FileData::Bytes(bytes.into()), FileKind::Document)
    }

    /// Infer media type and kind from the file name's suffix. The file is not
    /// read until the `FileSpec` is turned into a content block.
    pub fn from_path(path: impl AsRef<Path>) -> ConversationResult<Self> {
        let path = path.as_ref();
        let suffix = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let (media_type, kind) = match suffix.as_str() {
            "jpg" | "jpeg" => ("image/jpeg", FileKind::Image),
            "png" => ("image/png", FileKind::Image),
            "gif" => ("image/gif", FileKind::Image),
            "webp" => ("image/webp", FileKind::Image),
            "pdf" => ("application/pdf", FileKind::Document),
            _ => {
                return Err(ConversationError::UnrecognisedMediaType(
                    path.display().to_string(),
                ))
            }
        };
        Ok(Self::new(media_type, FileData::Path(path.to_path_buf()), kind))
    }

    fn bytes(&self) -> ConversationResult<Vec<u8>> {
        match &self.data {
            FileData::Bytes(bytes) => Ok(bytes.clone()),
            FileData::Path(path) => fs::read(path).map_err(|source| ConversationError::Attachment {
                path: path.clone(),
                source,
            }),
        }
    }

    /// Base64 encode the contents into an image or document block
    pub fn to_block(&self) -> ConversationResult<ContentBlock> {
        let data = base64::engine::general_purpose::STANDARD.encode(self.bytes()?);
        Ok(match self.kind {
            FileKind::Image => ContentBlock::image(&self.media_type, data),
            FileKind::Document => ContentBlock::document(&self.media_type, data),
        })
    }
}

/// A user message with every attachment first, followed by the text
pub fn compile_user_message(text: &str, files: &[FileSpec]) -> ConversationResult<Message> {
    let mut message = Message::user();
    for file in files {
        message = message.with_content(file.to_block()?);
    }
    Ok(message.with_text(text))
}
