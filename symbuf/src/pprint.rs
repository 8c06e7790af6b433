use prettytable::{self, format, Cell, Row};
use std::fmt;

use crate::attrs::AttrValue;
use crate::buffer::{Buffer, BufferNode};

#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum BufferPrintStyle {
    /// One column per field.
    Full,
    /// Only the fields which determine addressing.
    Compact,
}

const COMPACT_FIELDS: [&str; 5] = ["name", "dtype", "shape", "strides", "elem_offset"];

impl BufferPrintStyle {
    fn columns(self) -> &'static [&'static str] {
        match self {
            BufferPrintStyle::Full => &BufferNode::FIELD_NAMES,
            BufferPrintStyle::Compact => &COMPACT_FIELDS,
        }
    }
}

/// Pretty-print a table of [Buffer]s to stdout, one row per buffer.
pub fn pprint(buffers: &[Buffer], style: BufferPrintStyle) {
    pprint_table(buffers, style).printstd()
}

/// Pretty-print a table of [Buffer]s to a given [fmt::Write].
pub fn pprint_write<W: fmt::Write>(
    out: &mut W,
    buffers: &[Buffer],
    style: BufferPrintStyle,
) -> fmt::Result {
    write!(out, "{}", pprint_table(buffers, style))
}

pub fn pprint_string(buffers: &[Buffer], style: BufferPrintStyle) -> String {
    let mut buf = String::new();
    pprint_write(&mut buf, buffers, style).unwrap();
    buf
}

fn pprint_table(buffers: &[Buffer], style: BufferPrintStyle) -> prettytable::Table {
    let columns = style.columns();

    let mut table = prettytable::Table::new();
    table.set_titles(Row::new(columns.iter().map(|c| Cell::new(c)).collect()));
    for buffer in buffers {
        let mut cells = vec![None; columns.len()];
        buffer.visit_attrs(&mut |name: &'static str, value: AttrValue<'_>| {
            if let Some(idx) = columns.iter().position(|c| *c == name) {
                cells[idx] = Some(value.to_string());
            }
        });
        table.add_row(Row::new(
            cells
                .into_iter()
                .map(|c| Cell::new(c.as_deref().unwrap_or("")))
                .collect(),
        ));
    }

    let format = format::FormatBuilder::new()
        .separator(
            format::LinePosition::Title,
            format::LineSeparator::new('-', ' ', ' ', ' '),
        )
        .column_separator(' ')
        .build();
    table.set_format(format);
    table
}
