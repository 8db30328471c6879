//! Minimal Matter TLV codec used by the scripted mapping engine.
//!
//! A Matter SDK's own TLV writer/reader types are normally bound to its
//! data-model reply path; the scripted engine instead needs to build
//! standalone command/write payloads and unwrap standalone attribute
//! values, independent of any in-flight reply or concrete SDK. This module
//! implements the wire format directly: a control byte (tag control in the
//! high 3 bits, element type in the low 5), optional tag bytes, optional
//! length bytes, then the value. This mirrors the control-byte layout the
//! Matter TLV specification defines and that the original driver's
//! `EncodeJsonToTlv`/`JsonToTlv` CHIP helpers wrap; this implementation owns
//! the format directly instead of calling out to it.

use serde_json::Value as Json;

use crate::error::{DriverError, Result};

const TYPE_INT8: u8 = 0x00;
const TYPE_INT16: u8 = 0x01;
const TYPE_INT32: u8 = 0x02;
const TYPE_INT64: u8 = 0x03;
const TYPE_UINT8: u8 = 0x04;
const TYPE_UINT16: u8 = 0x05;
const TYPE_UINT32: u8 = 0x06;
const TYPE_UINT64: u8 = 0x07;
const TYPE_BOOL_FALSE: u8 = 0x08;
const TYPE_BOOL_TRUE: u8 = 0x09;
const TYPE_FLOAT: u8 = 0x0A;
const TYPE_DOUBLE: u8 = 0x0B;
const TYPE_UTF8STR_1: u8 = 0x0C;
const TYPE_UTF8STR_2: u8 = 0x0D;
const TYPE_OCTSTR_1: u8 = 0x10;
const TYPE_OCTSTR_2: u8 = 0x11;
const TYPE_NULL: u8 = 0x14;
const TYPE_STRUCT: u8 = 0x15;
const TYPE_ARRAY: u8 = 0x16;
const TYPE_END_OF_CONTAINER: u8 = 0x18;

/// A TLV element tag. Only anonymous and single-byte context tags are
/// needed for the mapping contracts this engine implements.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tag {
    Anonymous,
    Context(u8),
}

impl Tag {
    fn write(self, out: &mut Vec<u8>, element_type: u8) {
        match self {
            Tag::Anonymous => out.push(element_type),
            Tag::Context(id) => {
                out.push(0x20 | element_type);
                out.push(id);
            }
        }
    }
}

/// The coarse Barton type vocabulary used by SBMD specs. Unknown strings
/// fall back to `Struct`, matching the original's
/// `matterTypeToJsonTlvType()` unknown-type fallback (logged at the call
/// site).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BartonType {
    Bool,
    Uint,
    Int,
    Float,
    Double,
    String,
    Bytes,
    Struct,
    Array,
    Null,
}

pub fn classify(type_str: &str) -> BartonType {
    match type_str {
        "bool" | "boolean" => BartonType::Bool,
        "null" => BartonType::Null,
        "float" | "single" => BartonType::Float,
        "double" => BartonType::Double,
        "string" | "utf8str" | "char_string" => BartonType::String,
        "octstr" | "bytes" | "octet_string" => BartonType::Bytes,
        "array" | "list" => BartonType::Array,
        "struct" | "structure" => BartonType::Struct,
        s if s.starts_with("uint") => BartonType::Uint,
        s if s.starts_with("int") => BartonType::Int,
        other => {
            log::warn!("unknown Barton attribute type '{other}', treating as struct");
            BartonType::Struct
        }
    }
}

/// Encode a single JSON value, typed by its Barton type string, as a tagged
/// TLV element appended to `out`.
pub fn encode(out: &mut Vec<u8>, tag: Tag, type_str: &str, value: &Json) -> Result<()> {
    match classify(type_str) {
        BartonType::Bool => {
            let b = value
                .as_bool()
                .ok_or_else(|| DriverError::Mapping(format!("expected bool for '{type_str}'")))?;
            tag.write(out, if b { TYPE_BOOL_TRUE } else { TYPE_BOOL_FALSE });
        }
        BartonType::Uint => {
            let v = value
                .as_u64()
                .ok_or_else(|| DriverError::Mapping(format!("expected uint for '{type_str}'")))?;
            encode_uint(out, tag, v);
        }
        BartonType::Int => {
            let v = value
                .as_i64()
                .ok_or_else(|| DriverError::Mapping(format!("expected int for '{type_str}'")))?;
            encode_int(out, tag, v);
        }
        BartonType::Float => {
            let v = value
                .as_f64()
                .ok_or_else(|| DriverError::Mapping("expected float".into()))? as f32;
            tag.write(out, TYPE_FLOAT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        BartonType::Double => {
            let v = value
                .as_f64()
                .ok_or_else(|| DriverError::Mapping("expected double".into()))?;
            tag.write(out, TYPE_DOUBLE);
            out.extend_from_slice(&v.to_le_bytes());
        }
        BartonType::String => {
            let s = value
                .as_str()
                .ok_or_else(|| DriverError::Mapping("expected string".into()))?;
            let bytes = s.as_bytes();
            encode_len_prefixed(out, tag, TYPE_UTF8STR_1, TYPE_UTF8STR_2, bytes)?;
        }
        BartonType::Bytes => {
            let arr = value
                .as_array()
                .ok_or_else(|| DriverError::Mapping("octstr expects a byte-value array".into()))?;
            if arr.len() > u16::MAX as usize {
                return Err(DriverError::Mapping(
                    "octet string argument exceeds 16-bit length".into(),
                ));
            }
            let mut bytes = Vec::with_capacity(arr.len());
            for b in arr {
                let n = b
                    .as_u64()
                    .filter(|n| *n <= 255)
                    .ok_or_else(|| DriverError::Mapping("octstr element must be a byte".into()))?;
                bytes.push(n as u8);
            }
            encode_len_prefixed(out, tag, TYPE_OCTSTR_1, TYPE_OCTSTR_2, &bytes)?;
        }
        BartonType::Null => {
            tag.write(out, TYPE_NULL);
        }
        BartonType::Array => {
            let arr = value
                .as_array()
                .ok_or_else(|| DriverError::Mapping("expected array".into()))?;
            tag.write(out, TYPE_ARRAY);
            for el in arr {
                // Array elements carry anonymous tags regardless of the
                // container's own tag; element type is inferred per-value.
                encode_inferred(out, Tag::Anonymous, el)?;
            }
            Tag::Anonymous.write(out, TYPE_END_OF_CONTAINER);
        }
        BartonType::Struct => {
            let obj = value
                .as_object()
                .ok_or_else(|| DriverError::Mapping("expected struct/object".into()))?;
            tag.write(out, TYPE_STRUCT);
            for (key, val) in obj {
                let ctx = key
                    .parse::<u8>()
                    .map_err(|_| DriverError::Mapping(format!("struct key '{key}' is not a context tag")))?;
                encode_inferred(out, Tag::Context(ctx), val)?;
            }
            Tag::Anonymous.write(out, TYPE_END_OF_CONTAINER);
        }
    }
    Ok(())
}

/// Encode a command's argument payload as a TLV structure whose context
/// tags are the argument's positional index, per §4.5: "the engine emits a
/// TLV structure with sequential indexed keys."
pub fn encode_command_args(
    args: &[crate::sbmd::spec::SbmdArgument],
    value: &Json,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if args.is_empty() {
        if !value.is_null() {
            return Err(DriverError::Mapping(
                "command declares zero arguments but script produced output".into(),
            ));
        }
        out.push(TYPE_STRUCT);
        out.push(TYPE_END_OF_CONTAINER);
        return Ok(out);
    }

    let obj = value
        .as_object()
        .ok_or_else(|| DriverError::Mapping("command output must be an object of named arguments".into()))?;

    out.push(TYPE_STRUCT);
    for (idx, arg) in args.iter().enumerate() {
        let Some(v) = obj.get(&arg.name) else {
            return Err(DriverError::Mapping(format!(
                "command output missing argument '{}'",
                arg.name
            )));
        };
        encode(&mut out, Tag::Context(idx as u8), &arg.argument_type, v)?;
    }
    out.push(TYPE_END_OF_CONTAINER);
    Ok(out)
}

/// Encode without a declared Barton type, inferring the TLV element kind
/// from the JSON value's own shape. Used for array/struct members that
/// don't carry their own type annotation.
fn encode_inferred(out: &mut Vec<u8>, tag: Tag, value: &Json) -> Result<()> {
    match value {
        Json::Null => tag.write(out, TYPE_NULL),
        Json::Bool(b) => tag.write(out, if *b { TYPE_BOOL_TRUE } else { TYPE_BOOL_FALSE }),
        Json::Number(n) => {
            if let Some(u) = n.as_u64() {
                encode_uint(out, tag, u);
            } else if let Some(i) = n.as_i64() {
                encode_int(out, tag, i);
            } else if let Some(f) = n.as_f64() {
                tag.write(out, TYPE_DOUBLE);
                out.extend_from_slice(&f.to_le_bytes());
            }
        }
        Json::String(s) => encode_len_prefixed(out, tag, TYPE_UTF8STR_1, TYPE_UTF8STR_2, s.as_bytes())?,
        Json::Array(_) => encode(out, tag, "array", value)?,
        Json::Object(_) => encode(out, tag, "struct", value)?,
    }
    Ok(())
}

fn encode_uint(out: &mut Vec<u8>, tag: Tag, v: u64) {
    if v <= u8::MAX as u64 {
        tag.write(out, TYPE_UINT8);
        out.push(v as u8);
    } else if v <= u16::MAX as u64 {
        tag.write(out, TYPE_UINT16);
        out.extend_from_slice(&(v as u16).to_le_bytes());
    } else if v <= u32::MAX as u64 {
        tag.write(out, TYPE_UINT32);
        out.extend_from_slice(&(v as u32).to_le_bytes());
    } else {
        tag.write(out, TYPE_UINT64);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn encode_int(out: &mut Vec<u8>, tag: Tag, v: i64) {
    if v >= i8::MIN as i64 && v <= i8::MAX as i64 {
        tag.write(out, TYPE_INT8);
        out.push(v as i8 as u8);
    } else if v >= i16::MIN as i64 && v <= i16::MAX as i64 {
        tag.write(out, TYPE_INT16);
        out.extend_from_slice(&(v as i16).to_le_bytes());
    } else if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
        tag.write(out, TYPE_INT32);
        out.extend_from_slice(&(v as i32).to_le_bytes());
    } else {
        tag.write(out, TYPE_INT64);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn encode_len_prefixed(out: &mut Vec<u8>, tag: Tag, ty1: u8, ty2: u8, bytes: &[u8]) -> Result<()> {
    if bytes.len() <= u8::MAX as usize {
        tag.write(out, ty1);
        out.push(bytes.len() as u8);
    } else if bytes.len() <= u16::MAX as usize {
        tag.write(out, ty2);
        out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    } else {
        return Err(DriverError::Mapping("value exceeds 16-bit length".into()));
    }
    out.extend_from_slice(bytes);
    Ok(())
}

/// Decode a single top-level TLV element (as stored in the data cache) into
/// a JSON value, per the element's declared Barton type. Returns the
/// decoded value; trailing bytes (there should be none for a cached
/// attribute value) are ignored.
pub fn decode(type_str: &str, bytes: &[u8]) -> Result<Json> {
    let (value, _) = decode_element(bytes)?;
    let _ = classify(type_str); // validated for logging/consistency only
    Ok(value)
}

fn read_len(bytes: &[u8], width: usize) -> Result<(usize, usize)> {
    if bytes.len() < width {
        return Err(DriverError::Mapping("truncated TLV length".into()));
    }
    let mut len: usize = 0;
    for i in (0..width).rev() {
        len = (len << 8) | bytes[i] as usize;
    }
    Ok((len, width))
}

/// Bounds-checked slice of `n` bytes at the front of `bytes`, failing with
/// a `Mapping` error instead of panicking on truncated/malformed input —
/// this decoder runs over device-controlled wire data, so a short buffer
/// must fail the current resource op, never crash the process (spec §7).
fn take(bytes: &[u8], n: usize, what: &str) -> Result<&[u8]> {
    bytes
        .get(..n)
        .ok_or_else(|| DriverError::Mapping(format!("truncated TLV {what}")))
}

fn byte_at(bytes: &[u8], idx: usize, what: &str) -> Result<u8> {
    bytes
        .get(idx)
        .copied()
        .ok_or_else(|| DriverError::Mapping(format!("truncated TLV {what}")))
}

fn decode_element(bytes: &[u8]) -> Result<(Json, usize)> {
    if bytes.is_empty() {
        return Err(DriverError::Mapping("empty TLV buffer".into()));
    }
    let control = bytes[0];
    let tag_control = control >> 5;
    let element_type = control & 0x1F;
    let tag_len = match tag_control {
        0 => 0,
        1 => 1,
        2 => 2,
        3 => 4,
        4 => 2,
        5 => 4,
        6 => 6,
        7 => 8,
        _ => return Err(DriverError::Mapping("invalid TLV tag control".into())),
    };
    let pos = 1 + tag_len;
    if bytes.len() < pos {
        return Err(DriverError::Mapping("truncated TLV tag".into()));
    }

    let rest = &bytes[pos..];
    match element_type {
        TYPE_INT8 => Ok((Json::from(byte_at(rest, 0, "int8 value")? as i8 as i64), pos + 1)),
        TYPE_UINT8 => Ok((Json::from(byte_at(rest, 0, "uint8 value")? as u64), pos + 1)),
        TYPE_INT16 => Ok((
            Json::from(i16::from_le_bytes(take(rest, 2, "int16 value")?.try_into().unwrap()) as i64),
            pos + 2,
        )),
        TYPE_UINT16 => Ok((
            Json::from(u16::from_le_bytes(take(rest, 2, "uint16 value")?.try_into().unwrap()) as u64),
            pos + 2,
        )),
        TYPE_INT32 => Ok((
            Json::from(i32::from_le_bytes(take(rest, 4, "int32 value")?.try_into().unwrap()) as i64),
            pos + 4,
        )),
        TYPE_UINT32 => Ok((
            Json::from(u32::from_le_bytes(take(rest, 4, "uint32 value")?.try_into().unwrap()) as u64),
            pos + 4,
        )),
        TYPE_INT64 => Ok((
            Json::from(i64::from_le_bytes(take(rest, 8, "int64 value")?.try_into().unwrap())),
            pos + 8,
        )),
        TYPE_UINT64 => Ok((
            Json::from(u64::from_le_bytes(take(rest, 8, "uint64 value")?.try_into().unwrap())),
            pos + 8,
        )),
        TYPE_BOOL_FALSE => Ok((Json::Bool(false), pos)),
        TYPE_BOOL_TRUE => Ok((Json::Bool(true), pos)),
        TYPE_FLOAT => Ok((
            Json::from(f32::from_le_bytes(take(rest, 4, "float value")?.try_into().unwrap()) as f64),
            pos + 4,
        )),
        TYPE_DOUBLE => Ok((
            Json::from(f64::from_le_bytes(take(rest, 8, "double value")?.try_into().unwrap())),
            pos + 8,
        )),
        TYPE_UTF8STR_1 | TYPE_OCTSTR_1 => {
            let len = byte_at(rest, 0, "string length")? as usize;
            let data = take(rest, 1 + len, "string data")?;
            let data = &data[1..];
            let v = if element_type == TYPE_UTF8STR_1 {
                Json::from(String::from_utf8_lossy(data).into_owned())
            } else {
                Json::from(data.iter().map(|b| Json::from(*b as u64)).collect::<Vec<_>>())
            };
            Ok((v, pos + 1 + len))
        }
        TYPE_UTF8STR_2 | TYPE_OCTSTR_2 => {
            let (len, width) = read_len(rest, 2)?;
            let data = take(rest, width + len, "string data")?;
            let data = &data[width..];
            let v = if element_type == TYPE_UTF8STR_2 {
                Json::from(String::from_utf8_lossy(data).into_owned())
            } else {
                Json::from(data.iter().map(|b| Json::from(*b as u64)).collect::<Vec<_>>())
            };
            Ok((v, pos + width + len))
        }
        TYPE_NULL => Ok((Json::Null, pos)),
        TYPE_STRUCT => decode_container(rest, pos, true),
        TYPE_ARRAY => decode_container(rest, pos, false),
        other => Err(DriverError::Mapping(format!(
            "unsupported TLV element type 0x{other:02x}"
        ))),
    }
}

fn decode_container(rest: &[u8], base_pos: usize, is_struct: bool) -> Result<(Json, usize)> {
    let mut offset = 0;
    let mut obj = serde_json::Map::new();
    let mut arr = Vec::new();
    let mut next_index: u8 = 0;

    loop {
        if offset >= rest.len() {
            return Err(DriverError::Mapping("unterminated TLV container".into()));
        }
        let control = rest[offset];
        if control == TYPE_END_OF_CONTAINER {
            offset += 1;
            break;
        }
        let tag_control = control >> 5;
        let ctx_tag = if tag_control == 1 {
            Some(byte_at(rest, offset + 1, "context tag")?)
        } else {
            None
        };
        let (value, consumed) = decode_element(&rest[offset..])?;
        offset += consumed;
        if is_struct {
            let key = ctx_tag.unwrap_or(next_index);
            obj.insert(key.to_string(), value);
            next_index = key + 1;
        } else {
            arr.push(value);
        }
    }

    let json = if is_struct {
        Json::Object(obj)
    } else {
        Json::Array(arr)
    };
    Ok((json, base_pos + offset))
}
