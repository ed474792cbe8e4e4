//! Coercion of permissive user inputs into canonical [`Part`]s and [`Content`]s.
//!
//! Inputs are modelled as tagged variants with `From` impls for the common Rust types;
//! [`to_part`], [`to_content`] and [`to_contents`] are the only dispatch points.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use serde_json::Value;

use crate::types::{Blob, Content, FileData, Part, Role};
use crate::{Error, ErrorContext, Result};

/// An image supplied by the caller.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// A local image file; its bytes are sent as-is when the format is supported.
    Path(PathBuf),
    /// Encoded image bytes, optionally with a known mime type.
    Bytes {
        data: Vec<u8>,
        mime_type: Option<String>,
    },
    /// A decoded in-memory image with no backing file; encoded as webp.
    Decoded(Arc<DynamicImage>),
}

/// Anything that can become a single [`Part`].
#[derive(Debug, Clone)]
pub enum PartInput {
    Text(String),
    Blob { mime_type: String, data: Vec<u8> },
    Image(ImageInput),
    File(FileData),
    Part(Part),
    /// A part dict, e.g. `{"text": "hi"}` or `{"inline_data": {...}}`.
    Json(Value),
}

/// Anything that can become one or more [`Content`]s.
#[derive(Debug, Clone)]
pub enum ContentInput {
    Part(PartInput),
    Parts(Vec<PartInput>),
    Content(Content),
    Contents(Vec<Content>),
    /// A content dict (`{"parts": [...], "role": "user"}`), a part dict, a string or a list
    /// of any of these.
    Json(Value),
    Many(Vec<ContentInput>),
}

impl PartInput {
    pub fn image_path(path: impl Into<PathBuf>) -> Self {
        PartInput::Image(ImageInput::Path(path.into()))
    }

    pub fn image_bytes(data: Vec<u8>) -> Self {
        PartInput::Image(ImageInput::Bytes {
            data,
            mime_type: None,
        })
    }

    pub fn image(image: DynamicImage) -> Self {
        PartInput::Image(ImageInput::Decoded(Arc::new(image)))
    }

    pub fn blob(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        PartInput::Blob {
            mime_type: mime_type.into(),
            data,
        }
    }
}

impl From<&str> for PartInput {
    fn from(s: &str) -> Self {
        PartInput::Text(s.to_string())
    }
}

impl From<String> for PartInput {
    fn from(s: String) -> Self {
        PartInput::Text(s)
    }
}

impl From<Part> for PartInput {
    fn from(p: Part) -> Self {
        PartInput::Part(p)
    }
}

impl From<Blob> for PartInput {
    fn from(b: Blob) -> Self {
        PartInput::Blob {
            mime_type: b.mime_type,
            data: b.data,
        }
    }
}

impl From<FileData> for PartInput {
    fn from(f: FileData) -> Self {
        PartInput::File(f)
    }
}

impl From<ImageInput> for PartInput {
    fn from(i: ImageInput) -> Self {
        PartInput::Image(i)
    }
}

impl From<DynamicImage> for PartInput {
    fn from(i: DynamicImage) -> Self {
        PartInput::image(i)
    }
}

impl From<Value> for PartInput {
    fn from(v: Value) -> Self {
        PartInput::Json(v)
    }
}

macro_rules! single_part_content {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ContentInput {
                fn from(v: $ty) -> Self {
                    ContentInput::Part(v.into())
                }
            }
        )*
    };
}

single_part_content!(&str, String, Part, Blob, FileData, ImageInput, DynamicImage);

impl From<PartInput> for ContentInput {
    fn from(p: PartInput) -> Self {
        ContentInput::Part(p)
    }
}

impl From<Content> for ContentInput {
    fn from(c: Content) -> Self {
        ContentInput::Content(c)
    }
}

impl From<Vec<Content>> for ContentInput {
    fn from(v: Vec<Content>) -> Self {
        ContentInput::Contents(v)
    }
}

impl From<&[Content]> for ContentInput {
    fn from(v: &[Content]) -> Self {
        ContentInput::Contents(v.to_vec())
    }
}

impl From<Vec<Part>> for ContentInput {
    fn from(v: Vec<Part>) -> Self {
        ContentInput::Parts(v.into_iter().map(PartInput::Part).collect())
    }
}

impl From<Vec<PartInput>> for ContentInput {
    fn from(v: Vec<PartInput>) -> Self {
        ContentInput::Parts(v)
    }
}

impl From<Vec<&str>> for ContentInput {
    fn from(v: Vec<&str>) -> Self {
        ContentInput::Parts(v.into_iter().map(PartInput::from).collect())
    }
}

impl From<Vec<String>> for ContentInput {
    fn from(v: Vec<String>) -> Self {
        ContentInput::Parts(v.into_iter().map(PartInput::from).collect())
    }
}

impl From<Vec<ContentInput>> for ContentInput {
    fn from(v: Vec<ContentInput>) -> Self {
        ContentInput::Many(v)
    }
}

impl From<Value> for ContentInput {
    fn from(v: Value) -> Self {
        ContentInput::Json(v)
    }
}

fn invalid(msg: impl Into<String>, field: impl Into<String>) -> Error {
    Error::invalid_input_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("content_coercion"),
    )
}

/// Coerce one input into a [`Part`].
pub fn to_part(input: PartInput) -> Result<Part> {
    match input {
        PartInput::Text(t) => Ok(Part::Text(t)),
        PartInput::Blob { mime_type, data } => {
            if mime_type.trim().is_empty() {
                return Err(invalid("blob requires a mime type", "inline_data.mime_type"));
            }
            Ok(Part::InlineData(Blob { mime_type, data }))
        }
        PartInput::Image(image) => image_to_blob(image).map(Part::InlineData),
        PartInput::File(f) => {
            if f.file_uri.trim().is_empty() {
                return Err(invalid("file reference requires a uri", "file_data.file_uri"));
            }
            Ok(Part::FileData(f))
        }
        PartInput::Part(p) => Ok(p),
        PartInput::Json(v) => part_from_json(v),
    }
}

fn part_from_json(value: Value) -> Result<Part> {
    match value {
        Value::String(s) => Ok(Part::Text(s)),
        Value::Object(ref map) if map.contains_key("parts") => Err(invalid(
            "expected a part but got a content (it has a `parts` key)",
            "part",
        )),
        Value::Object(_) => serde_json::from_value(value)
            .map_err(|e| invalid(format!("malformed part: {}", e), "part")),
        other => Err(invalid(
            format!("cannot build a part from JSON {}", json_kind(&other)),
            "part",
        )),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn content_from_json(value: Value, default_role: Option<Role>) -> Result<Content> {
    match value {
        Value::Object(mut map) if map.contains_key("parts") => {
            let role = match map.remove("role") {
                None | Some(Value::Null) => default_role,
                Some(Value::String(r)) => Some(
                    Role::parse(&r)
                        .ok_or_else(|| invalid(format!("unknown role `{}`", r), "role"))?,
                ),
                Some(other) => {
                    return Err(invalid(
                        format!("role must be a string, got {}", json_kind(&other)),
                        "role",
                    ))
                }
            };
            let parts = match map.remove("parts") {
                Some(Value::String(s)) => vec![Part::Text(s)],
                Some(Value::Array(items)) => items
                    .into_iter()
                    .map(part_from_json)
                    .collect::<Result<Vec<_>>>()?,
                Some(other) => vec![part_from_json(other)?],
                None => Vec::new(),
            };
            Ok(Content { role, parts })
        }
        Value::Array(items) => {
            let parts = items
                .into_iter()
                .map(|item| {
                    if item.is_array() {
                        Err(invalid(
                            "a list of lists is ambiguous; supply contents with explicit roles",
                            "contents",
                        ))
                    } else {
                        part_from_json(item)
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Content {
                role: default_role,
                parts,
            })
        }
        other => Ok(Content {
            role: default_role,
            parts: vec![part_from_json(other)?],
        }),
    }
}

/// Classification of a list element when deciding between "one content of many parts" and
/// "many contents".
enum Shape {
    ContentLike,
    PartLike,
    Nested,
}

fn shape_of_json(v: &Value) -> Shape {
    match v {
        Value::Object(map) if map.contains_key("parts") => Shape::ContentLike,
        Value::Array(_) => Shape::Nested,
        _ => Shape::PartLike,
    }
}

fn shape_of(input: &ContentInput) -> Shape {
    match input {
        ContentInput::Content(_) => Shape::ContentLike,
        ContentInput::Part(_) => Shape::PartLike,
        ContentInput::Json(v) => shape_of_json(v),
        ContentInput::Parts(_) | ContentInput::Contents(_) | ContentInput::Many(_) => {
            Shape::Nested
        }
    }
}

/// Coerce an input into exactly one [`Content`]; loose parts get the `user` role.
pub fn to_content(input: ContentInput) -> Result<Content> {
    match input {
        ContentInput::Part(p) => Ok(Content::new(Role::User, vec![to_part(p)?])),
        ContentInput::Parts(parts) => {
            let parts = parts.into_iter().map(to_part).collect::<Result<Vec<_>>>()?;
            Ok(Content::new(Role::User, parts))
        }
        ContentInput::Content(c) => Ok(c),
        ContentInput::Contents(mut v) => {
            if v.len() == 1 {
                Ok(v.remove(0))
            } else {
                Err(invalid(
                    format!("expected a single content, got {}", v.len()),
                    "content",
                ))
            }
        }
        ContentInput::Json(v) => match v {
            Value::Array(items)
                if !items.is_empty()
                    && items
                        .iter()
                        .all(|i| matches!(shape_of_json(i), Shape::ContentLike)) =>
            {
                if items.len() == 1 {
                    let item = items.into_iter().next().unwrap_or(Value::Null);
                    content_from_json(item, Some(Role::User))
                } else {
                    Err(invalid(
                        format!("expected a single content, got {}", items.len()),
                        "content",
                    ))
                }
            }
            other => content_from_json(other, Some(Role::User)),
        },
        ContentInput::Many(items) => {
            let mut contents = contents_from_many(items)?;
            if contents.len() == 1 {
                Ok(contents.remove(0))
            } else {
                Err(invalid(
                    format!("expected a single content, got {}", contents.len()),
                    "content",
                ))
            }
        }
    }
}

fn contents_from_many(items: Vec<ContentInput>) -> Result<Vec<Content>> {
    let mut content_like = 0usize;
    let mut part_like = 0usize;
    for item in &items {
        match shape_of(item) {
            Shape::ContentLike => content_like += 1,
            Shape::PartLike => part_like += 1,
            Shape::Nested => {
                return Err(invalid(
                    "a list of lists is ambiguous; supply contents with explicit roles",
                    "contents",
                ))
            }
        }
    }
    if content_like > 0 && part_like > 0 {
        return Err(invalid(
            "list mixes contents and parts; supply either contents or parts",
            "contents",
        ));
    }
    if part_like > 0 {
        let parts = items
            .into_iter()
            .map(|item| match item {
                ContentInput::Part(p) => to_part(p),
                ContentInput::Json(v) => part_from_json(v),
                _ => Err(invalid("unexpected element in parts list", "parts")),
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(vec![Content::new(Role::User, parts)]);
    }
    items
        .into_iter()
        .map(|item| match item {
            ContentInput::Content(c) => Ok(with_default_role(c, Role::User)),
            ContentInput::Json(v) => content_from_json(v, Some(Role::User)),
            _ => Err(invalid("unexpected element in contents list", "contents")),
        })
        .collect()
}

fn with_default_role(mut c: Content, role: Role) -> Content {
    if c.role.is_none() {
        c.role = Some(role);
    }
    c
}

/// Coerce an input into an ordered list of [`Content`]s for an outgoing request.
///
/// Missing roles default to `user`. The operation is idempotent:
/// `to_contents(to_contents(x).into()) == to_contents(x)`.
pub fn to_contents(input: ContentInput) -> Result<Vec<Content>> {
    match input {
        ContentInput::Part(_) | ContentInput::Parts(_) => Ok(vec![to_content(input)?]),
        ContentInput::Content(c) => Ok(vec![with_default_role(c, Role::User)]),
        ContentInput::Contents(v) => Ok(v
            .into_iter()
            .map(|c| with_default_role(c, Role::User))
            .collect()),
        ContentInput::Json(Value::Array(items)) => {
            let mut content_like = 0usize;
            let mut part_like = 0usize;
            for item in &items {
                match shape_of_json(item) {
                    Shape::ContentLike => content_like += 1,
                    Shape::PartLike => part_like += 1,
                    Shape::Nested => {
                        return Err(invalid(
                            "a list of lists is ambiguous; supply contents with explicit roles",
                            "contents",
                        ))
                    }
                }
            }
            if content_like > 0 && part_like > 0 {
                return Err(invalid(
                    "list mixes contents and parts; supply either contents or parts",
                    "contents",
                ));
            }
            if content_like > 0 {
                items
                    .into_iter()
                    .map(|item| content_from_json(item, Some(Role::User)))
                    .collect()
            } else {
                Ok(vec![content_from_json(Value::Array(items), Some(Role::User))?])
            }
        }
        ContentInput::Json(v) => Ok(vec![content_from_json(v, Some(Role::User))?]),
        ContentInput::Many(items) => contents_from_many(items),
    }
}

/// Mime types the service accepts for inline images without re-encoding.
const SUPPORTED_IMAGE_MIMES: [&str; 5] = [
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/heic",
    "image/heif",
];

fn image_to_blob(input: ImageInput) -> Result<Blob> {
    match input {
        ImageInput::Path(path) => {
            let data = std::fs::read(&path)?;
            let format = image::guess_format(&data)
                .ok()
                .or_else(|| ImageFormat::from_path(&path).ok());
            encoded_to_blob(data, None, format, Some(&path))
        }
        ImageInput::Bytes { data, mime_type } => {
            let format = image::guess_format(&data).ok();
            encoded_to_blob(data, mime_type, format, None)
        }
        ImageInput::Decoded(img) => encode_webp(&img),
    }
}

fn encoded_to_blob(
    data: Vec<u8>,
    explicit_mime: Option<String>,
    format: Option<ImageFormat>,
    path: Option<&Path>,
) -> Result<Blob> {
    if let Some(mime_type) = explicit_mime {
        return Ok(Blob { mime_type, data });
    }
    let format = format.ok_or_else(|| {
        invalid(
            format!(
                "unrecognised image format{}",
                path.map(|p| format!(" for {}", p.display()))
                    .unwrap_or_default()
            ),
            "image",
        )
    })?;
    let mime = format.to_mime_type();
    if SUPPORTED_IMAGE_MIMES.contains(&mime) {
        return Ok(Blob {
            mime_type: mime.to_string(),
            data,
        });
    }
    // Decodable but not accepted by the service: re-encode.
    let img = image::load_from_memory_with_format(&data, format)
        .map_err(|e| invalid(format!("failed to decode {} image: {}", mime, e), "image"))?;
    encode_webp(&img)
}

fn encode_webp(img: &DynamicImage) -> Result<Blob> {
    let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
    let mut buf = Vec::new();
    rgba.write_to(&mut Cursor::new(&mut buf), ImageFormat::WebP)
        .map_err(|e| invalid(format!("failed to encode image as webp: {}", e), "image"))?;
    Ok(Blob {
        mime_type: "image/webp".to_string(),
        data: buf,
    })
}
