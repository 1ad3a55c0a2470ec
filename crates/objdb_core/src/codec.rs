//! Field codec driven by version schemas.
//!
//! Every persisted `(table, version)` pair has a [`VersionSchema`]. This
//! module turns a schema into the four operations the object and relation
//! layers need: encode a value list, decode into a [`Record`] of the current
//! layout, skip a value without materializing it, and collect the nested
//! dictionary ids a row refers to.

use crate::error::{CoreError, CoreResult};
use crate::object::AnyObject;
use crate::schema::{FieldDef, FieldDescriptor, FieldKind, VersionSchema};
use crate::types::DictId;
use crate::value::{Record, Value};
use objdb_codec::{ByteReader, ByteWriter};
use tracing::debug;

/// Sink for object references met while encoding.
pub(crate) trait ObjectWriter {
    fn write_object(&mut self, writer: &mut ByteWriter, obj: Option<&AnyObject>)
        -> CoreResult<()>;
}

/// Source of object references met while decoding.
pub(crate) trait ObjectReader {
    fn read_object(&mut self, reader: &mut ByteReader<'_>) -> CoreResult<Option<AnyObject>>;
    fn skip_object(&mut self, reader: &mut ByteReader<'_>) -> CoreResult<()>;
}

/// Object handler for key fields, which never contain references.
pub(crate) struct NoObjects;

impl ObjectWriter for NoObjects {
    fn write_object(&mut self, _: &mut ByteWriter, _: Option<&AnyObject>) -> CoreResult<()> {
        Err(CoreError::unsupported_type("object reference in key"))
    }
}

impl ObjectReader for NoObjects {
    fn read_object(&mut self, _: &mut ByteReader<'_>) -> CoreResult<Option<AnyObject>> {
        Err(CoreError::invalid_format("object reference in key"))
    }

    fn skip_object(&mut self, _: &mut ByteReader<'_>) -> CoreResult<()> {
        Err(CoreError::invalid_format("object reference in key"))
    }
}

/// Value rows favour compact integers; keys favour numeric ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layout {
    Value,
    Key,
}

fn write_value(
    w: &mut ByteWriter,
    kind: &FieldKind,
    value: &Value,
    layout: Layout,
    objects: &mut dyn ObjectWriter,
) -> CoreResult<()> {
    match (kind, value) {
        (FieldKind::Bool, Value::Bool(v)) => w.write_bool(*v),
        (FieldKind::U8, Value::U8(v)) => w.write_vuint(u64::from(*v)),
        (FieldKind::U32, Value::U32(v)) => w.write_vuint(u64::from(*v)),
        (FieldKind::U64, Value::U64(v)) => w.write_vuint(*v),
        (FieldKind::I32, Value::I32(v)) => write_signed(w, i64::from(*v), layout),
        (FieldKind::I64, Value::I64(v)) => write_signed(w, *v, layout),
        (FieldKind::F64, Value::F64(v)) => match layout {
            Layout::Value => w.write_f64(*v),
            Layout::Key => w.write_f64_ordered(*v),
        },
        (FieldKind::String, Value::String(v)) => match layout {
            Layout::Value => w.write_str(v),
            Layout::Key => w.write_str_ordered(v),
        },
        (FieldKind::Bytes, Value::Bytes(v)) => match layout {
            Layout::Value => w.write_bytes(v),
            Layout::Key => w.write_bytes_ordered(v),
        },
        (FieldKind::Guid, Value::Guid(v)) => w.write_guid(v),
        (FieldKind::List(item), Value::List(items)) => {
            w.write_vuint(items.len() as u64);
            for v in items {
                write_value(w, item, v, layout, objects)?;
            }
        }
        (FieldKind::Optional(item), Value::Optional(inner)) => match inner {
            None => w.write_u8(0),
            Some(v) => {
                w.write_u8(1);
                write_value(w, item, v, layout, objects)?;
            }
        },
        (FieldKind::Object, Value::Object(obj)) => objects.write_object(w, obj.as_ref())?,
        (FieldKind::Dictionary, Value::Dictionary(id)) => w.write_vuint(id.as_u64()),
        (kind, value) => {
            return Err(CoreError::invalid_operation(format!(
                "value {value:?} does not match field kind {kind:?}"
            )))
        }
    }
    Ok(())
}

fn write_signed(w: &mut ByteWriter, value: i64, layout: Layout) {
    match layout {
        Layout::Value => w.write_vint(value),
        Layout::Key => w.write_i64_ordered(value),
    }
}

fn read_signed(r: &mut ByteReader<'_>, layout: Layout) -> CoreResult<i64> {
    Ok(match layout {
        Layout::Value => r.read_vint()?,
        Layout::Key => r.read_i64_ordered()?,
    })
}

fn read_value(
    r: &mut ByteReader<'_>,
    kind: &FieldKind,
    layout: Layout,
    objects: &mut dyn ObjectReader,
) -> CoreResult<Value> {
    let value = match kind {
        FieldKind::Bool => Value::Bool(r.read_bool()?),
        FieldKind::U8 => Value::U8(
            u8::try_from(r.read_vuint()?).map_err(|_| CoreError::invalid_format("u8 overflow"))?,
        ),
        FieldKind::U32 => Value::U32(r.read_vuint32()?),
        FieldKind::U64 => Value::U64(r.read_vuint()?),
        FieldKind::I32 => Value::I32(
            i32::try_from(read_signed(r, layout)?)
                .map_err(|_| CoreError::invalid_format("i32 overflow"))?,
        ),
        FieldKind::I64 => Value::I64(read_signed(r, layout)?),
        FieldKind::F64 => Value::F64(match layout {
            Layout::Value => r.read_f64()?,
            Layout::Key => r.read_f64_ordered()?,
        }),
        FieldKind::String => Value::String(match layout {
            Layout::Value => r.read_str()?.to_owned(),
            Layout::Key => r.read_str_ordered()?,
        }),
        FieldKind::Bytes => Value::Bytes(match layout {
            Layout::Value => r.read_bytes()?.to_vec(),
            Layout::Key => r.read_bytes_ordered()?,
        }),
        FieldKind::Guid => Value::Guid(r.read_guid()?),
        FieldKind::List(item) => {
            let count = r.read_vuint()?;
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(read_value(r, item, layout, objects)?);
            }
            Value::List(items)
        }
        FieldKind::Optional(item) => match r.read_u8()? {
            0 => Value::Optional(None),
            1 => Value::optional(Some(read_value(r, item, layout, objects)?)),
            other => {
                return Err(CoreError::invalid_format(format!(
                    "invalid presence byte {other}"
                )))
            }
        },
        FieldKind::Object => Value::Object(objects.read_object(r)?),
        FieldKind::Dictionary => Value::Dictionary(DictId::new(r.read_vuint()?)),
    };
    Ok(value)
}

/// Advances `r` past one value of `kind` without building it.
pub(crate) fn skip_value(
    r: &mut ByteReader<'_>,
    kind: &FieldKind,
    objects: &mut dyn ObjectReader,
) -> CoreResult<()> {
    match kind {
        FieldKind::Bool => r.skip_raw(1)?,
        FieldKind::U8
        | FieldKind::U32
        | FieldKind::U64
        | FieldKind::I32
        | FieldKind::I64
        | FieldKind::Dictionary => r.skip_vuint()?,
        FieldKind::F64 => r.skip_raw(8)?,
        FieldKind::String | FieldKind::Bytes => r.skip_bytes()?,
        FieldKind::Guid => r.skip_raw(16)?,
        FieldKind::List(item) => {
            let count = r.read_vuint()?;
            for _ in 0..count {
                skip_value(r, item, objects)?;
            }
        }
        FieldKind::Optional(item) => {
            if r.read_u8()? != 0 {
                skip_value(r, item, objects)?;
            }
        }
        FieldKind::Object => objects.skip_object(r)?,
    }
    Ok(())
}

/// Writes `values` in the order of `fields`, converting where lossless.
pub(crate) fn encode_fields(
    w: &mut ByteWriter,
    fields: &[FieldDescriptor],
    values: &[Value],
    layout: Layout,
    objects: &mut dyn ObjectWriter,
) -> CoreResult<()> {
    if fields.len() != values.len() {
        return Err(CoreError::invalid_operation(format!(
            "expected {} field values, got {}",
            fields.len(),
            values.len()
        )));
    }
    for (field, value) in fields.iter().zip(values) {
        if value.matches(&field.kind) {
            write_value(w, &field.kind, value, layout, objects)?;
        } else {
            let converted = value.clone().convert(&field.kind).ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "field {} expects {:?}, got {value:?}",
                    field.name, field.kind
                ))
            })?;
            write_value(w, &field.kind, &converted, layout, objects)?;
        }
    }
    Ok(())
}

/// Encodes key fields, which must not reference objects.
pub(crate) fn encode_key(
    w: &mut ByteWriter,
    fields: &[FieldDescriptor],
    values: &[Value],
) -> CoreResult<()> {
    encode_fields(w, fields, values, Layout::Key, &mut NoObjects)
}

/// Decodes key fields into `record`.
pub(crate) fn decode_key(
    r: &mut ByteReader<'_>,
    fields: &[FieldDescriptor],
    record: &mut Record,
) -> CoreResult<()> {
    for field in fields {
        let value = read_value(r, &field.kind, Layout::Key, &mut NoObjects)?;
        record.set(field.name.clone(), value);
    }
    Ok(())
}

/// Collects the nested dictionary ids of a value row written with `stored`.
///
/// Only value fields are inspected, one level deep: dictionaries held by
/// inline objects are not followed.
pub(crate) fn find_dictionary_ids(
    r: &mut ByteReader<'_>,
    stored: &VersionSchema,
    objects: &mut dyn ObjectReader,
) -> CoreResult<Vec<DictId>> {
    let mut ids = Vec::new();
    for field in &stored.fields {
        collect_dictionaries(r, &field.kind, objects, &mut ids)?;
    }
    Ok(ids)
}

fn collect_dictionaries(
    r: &mut ByteReader<'_>,
    kind: &FieldKind,
    objects: &mut dyn ObjectReader,
    out: &mut Vec<DictId>,
) -> CoreResult<()> {
    if !kind.holds_dictionary() {
        return skip_value(r, kind, objects);
    }
    match kind {
        FieldKind::Dictionary => out.push(DictId::new(r.read_vuint()?)),
        FieldKind::Optional(item) => {
            if r.read_u8()? != 0 {
                collect_dictionaries(r, item, objects, out)?;
            }
        }
        FieldKind::List(item) => {
            let count = r.read_vuint()?;
            for _ in 0..count {
                collect_dictionaries(r, item, objects, out)?;
            }
        }
        _ => skip_value(r, kind, objects)?,
    }
    Ok(())
}

#[derive(Debug)]
struct LoadStep {
    kind: FieldKind,
    target: Option<FieldDef>,
}

/// Decoder from one stored version into the current field layout.
///
/// Built once per `(table, stored version)` and memoised by the registry.
#[derive(Debug)]
pub(crate) struct LoadPlan {
    steps: Vec<LoadStep>,
    missing: Vec<FieldDef>,
}

impl LoadPlan {
    pub(crate) fn build(stored: &VersionSchema, current: &[FieldDef]) -> Self {
        let steps = stored
            .fields
            .iter()
            .map(|field| LoadStep {
                kind: field.kind.clone(),
                target: current.iter().find(|def| def.name() == field.name).cloned(),
            })
            .collect();
        let missing = current
            .iter()
            .filter(|def| stored.field(def.name()).is_none())
            .cloned()
            .collect();
        Self { steps, missing }
    }

    /// Decodes the value fields of one row into `record`.
    pub(crate) fn decode(
        &self,
        r: &mut ByteReader<'_>,
        objects: &mut dyn ObjectReader,
        record: &mut Record,
    ) -> CoreResult<()> {
        for step in &self.steps {
            match &step.target {
                Some(def) => {
                    let value = read_value(r, &step.kind, Layout::Value, objects)?;
                    let value = value.convert(def.kind()).unwrap_or_else(|| {
                        debug!(field = def.name(), "stored value does not convert, initializing");
                        def.initial_value()
                    });
                    record.set(def.name(), value);
                }
                None => skip_value(r, &step.kind, objects)?,
            }
        }
        for def in &self.missing {
            record.set(def.name(), def.initial_value());
        }
        Ok(())
    }
}

/// Advances past every value field of a row written with `stored`.
pub(crate) fn skip_fields(
    r: &mut ByteReader<'_>,
    stored: &VersionSchema,
    objects: &mut dyn ObjectReader,
) -> CoreResult<()> {
    for field in &stored.fields {
        skip_value(r, &field.kind, objects)?;
    }
    Ok(())
}
