//! Load, edit and save scenarios across the whole record model.

use std::collections::BTreeMap;

use proptest::prelude::*;

use super::*;
use crate::common::binary;
use crate::escher::ClientAnchor;
use crate::xls::consts::{BOF, BOUNDSHEET, MULRK, NUMBER, RK};
use crate::xls::records::cells::parse_cell;

fn save(workbook: &mut Workbook) -> Vec<u8> {
    workbook.to_bytes(SaveOptions::default()).unwrap()
}

fn reload(bytes: &[u8]) -> Workbook {
    Workbook::from_bytes(bytes, LoadOptions { strict: true }).unwrap()
}

fn text_at(workbook: &Workbook, sheet: usize, row: u32, col: u16) -> Option<String> {
    let value = workbook.sheet(sheet).ok()?.cell_value(row, col).ok()?;
    workbook.text_of(&value)
}

#[test]
fn test_cell_records_roundtrip_through_a_saved_stream() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_sheet("Cells").unwrap();
    let values = [
        CellValue::Number(7.0),
        CellValue::Number(std::f64::consts::E),
        CellValue::Bool(false),
        CellValue::Error(0x07),
        CellValue::Blank,
    ];
    for (col, value) in values.iter().enumerate() {
        workbook.add_value(sheet, 0, col as u16, value.clone(), 21).unwrap();
    }
    let run = CellRecord::number_run(1, 2, &[(30, 1.0), (31, 2.5), (32, -4.0)]).unwrap();
    workbook.sheet_mut(sheet).unwrap().add_cell(run).unwrap();

    let before: Vec<CellRecord> = workbook.sheet(sheet).unwrap().cells().iter().map(|(_, c)| c.clone()).collect();
    let loaded = reload(&save(&mut workbook));
    let after: Vec<CellRecord> = loaded.sheet(0).unwrap().cells().iter().map(|(_, c)| c.clone()).collect();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!((a.row(), a.col(), a.xf(), a.opcode()), (b.row(), b.col(), b.xf(), b.opcode()));
        assert_eq!(a.body(), b.body());
    }

    for (col, value) in values.iter().enumerate() {
        assert_eq!(&loaded.sheet(0).unwrap().cell_value(0, col as u16).unwrap(), value);
    }
    let opcodes: Vec<u16> = after.iter().map(CellRecord::opcode).collect();
    assert!(opcodes.contains(&NUMBER));
    assert!(opcodes.contains(&RK));
    assert!(opcodes.contains(&MULRK));

    // every rendered record parses back to the same fields
    for cell in &after {
        for record in cell.render_all().iter().take(1) {
            let parsed = parse_cell(record, &mut Vec::new()).unwrap();
            assert_eq!(CellRecord::from_parsed(parsed).body(), cell.body());
        }
    }
}

#[test]
fn test_run_truncation_survives_save() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_sheet("Run").unwrap();
    let entries: Vec<(u16, f64)> = (2..=7).map(|_| (17, 9.0)).collect();
    let run = CellRecord::number_run(3, 2, &entries).unwrap();
    workbook.sheet_mut(sheet).unwrap().add_cell(run).unwrap();

    workbook.sheet_mut(sheet).unwrap().remove_cell(3, 4).unwrap();
    let loaded = reload(&save(&mut workbook));
    let ws = loaded.sheet(0).unwrap();

    assert!(ws.cell_value(3, 4).unwrap_err().is_not_found());
    for col in [2, 3, 5, 6, 7] {
        assert_eq!(ws.cell_value(3, col).unwrap(), CellValue::Number(9.0), "col {col}");
        let id = ws.cells().find(3, col).unwrap();
        assert_eq!(ws.cells().record(id).unwrap().xf_at(col), Some(17));
    }
    let spans: Vec<(u16, u16)> = ws
        .row_cells(3)
        .unwrap()
        .iter()
        .map(|cell| (cell.col(), cell.last_col()))
        .collect();
    assert_eq!(spans, vec![(2, 3), (5, 7)]);
    assert_eq!(ws.cells().check_consistency(), Ok(()));
}

#[test]
fn test_row_insert_scenario_survives_save() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_sheet("Shift").unwrap();
    for (row, text) in [(0, "A"), (5, "B"), (10, "C")] {
        workbook.add_value(sheet, row, 0, CellValue::Text(text.into()), 0).unwrap();
    }
    workbook.sheet_mut(sheet).unwrap().insert_rows(5, 1).unwrap();

    let loaded = reload(&save(&mut workbook));
    assert_eq!(text_at(&loaded, 0, 0, 0).as_deref(), Some("A"));
    assert_eq!(text_at(&loaded, 0, 6, 0).as_deref(), Some("B"));
    assert_eq!(text_at(&loaded, 0, 11, 0).as_deref(), Some("C"));
    assert!(loaded.sheet(0).unwrap().cell_value(5, 0).unwrap_err().is_not_found());

    let rows: Vec<u32> = loaded.sheet(0).unwrap().rows().map(|row| row.number()).collect();
    assert_eq!(rows, vec![0, 6, 11]);
    let dims = loaded.sheet(0).unwrap().dimensions();
    assert_eq!((dims.first_row, dims.last_row), (0, 12));
}

#[derive(Default)]
struct Shifts(Vec<(bool, u32, i64)>);

impl ReferenceTracker for Shifts {
    fn rows_shifted(&mut self, _sheet: SheetId, first_row: u32, delta: i64) {
        self.0.push((true, first_row, delta));
    }

    fn cols_shifted(&mut self, _sheet: SheetId, first_col: u16, delta: i64) {
        self.0.push((false, u32::from(first_col), delta));
    }
}

#[test]
fn test_shapes_follow_column_delete_and_save() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_sheet("Chart").unwrap();
    workbook.add_value(sheet, 0, 0, CellValue::Number(1.0), 0).unwrap();
    let shape = workbook
        .add_shape(sheet, &NewShape::rectangle(ClientAnchor::cells(4, 2, 6, 8)))
        .unwrap();

    let mut shifts = Shifts::default();
    workbook
        .sheet_mut(sheet)
        .unwrap()
        .delete_columns_with(1, 2, &mut shifts)
        .unwrap();
    assert_eq!(shifts.0, vec![(false, 1, -2)]);

    let loaded = reload(&save(&mut workbook));
    let shapes = loaded.sheet(0).unwrap().shapes();
    assert_eq!(shapes.len(), 1);
    assert_eq!(shapes[0].shape_id(), Some(shape));
    let anchor = shapes[0].anchor().unwrap();
    assert_eq!(anchor.top_left(), (2, 2));
    assert_eq!(anchor.bottom_right(), (4, 8));
}

#[test]
fn test_second_save_is_byte_identical() {
    let mut workbook = Workbook::new();
    let data = workbook.add_sheet("Data").unwrap();
    let notes = workbook.add_sheet("Notes").unwrap();
    for row in 0..70 {
        workbook.add_value(data, row, 0, CellValue::Number(f64::from(row)), 0).unwrap();
        workbook.add_value(data, row, 1, CellValue::Text(format!("r{}", row % 7)), 0).unwrap();
    }
    workbook.sheet_mut(data).unwrap().add_column_metadata(0, 1, 3000, 15).unwrap();
    workbook.sheet_mut(data).unwrap().set_row_height(3, 400).unwrap();
    workbook
        .add_shape(notes, &NewShape::rectangle(ClientAnchor::cells(0, 0, 2, 2)))
        .unwrap();

    let first = save(&mut workbook);
    let mut loaded = reload(&first);
    let second = save(&mut loaded);
    assert_eq!(first, second);
}

#[test]
fn test_edit_after_reload_keeps_offsets_consistent() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_sheet("One").unwrap();
    workbook.add_value(sheet, 0, 0, CellValue::Number(1.0), 0).unwrap();
    let mut loaded = reload(&save(&mut workbook));

    loaded.add_sheet("Two").unwrap();
    loaded.add_value(1, 2, 2, CellValue::Text("late".into()), 0).unwrap();
    loaded.sheet_mut(0).unwrap().insert_columns(0, 1).unwrap();
    let bytes = save(&mut loaded);

    let again = reload(&bytes);
    assert_eq!(again.sheet_count(), 2);
    assert_eq!(again.sheet(0).unwrap().cell_value(0, 1).unwrap(), CellValue::Number(1.0));
    assert_eq!(text_at(&again, 1, 2, 2).as_deref(), Some("late"));
    for id in loaded.globals().find_all(BOUNDSHEET) {
        let record = loaded.globals().get(id).unwrap();
        let position = binary::read_u32_le(&record.payload, 0).unwrap() as usize;
        assert_eq!(binary::read_u16_le(&bytes, position).unwrap(), BOF);
    }
}

#[derive(Debug, Clone)]
enum Edit {
    Value(u32, u16, u8),
    Run(u32, u16, u8),
    Remove(u32, u16),
    InsertRows(u32, u32),
    DeleteRows(u32, u32),
    InsertCols(u16, u16),
    DeleteCols(u16, u16),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0u32..30, 0u16..16, any::<u8>()).prop_map(|(r, c, v)| Edit::Value(r, c, v)),
        (0u32..30, 0u16..16, 2u8..5).prop_map(|(r, c, w)| Edit::Run(r, c, w)),
        (0u32..30, 0u16..16).prop_map(|(r, c)| Edit::Remove(r, c)),
        (0u32..30, 1u32..3).prop_map(|(at, n)| Edit::InsertRows(at, n)),
        (0u32..30, 1u32..3).prop_map(|(at, n)| Edit::DeleteRows(at, n)),
        (0u16..16, 1u16..3).prop_map(|(at, n)| Edit::InsertCols(at, n)),
        (0u16..16, 1u16..3).prop_map(|(at, n)| Edit::DeleteCols(at, n)),
    ]
}

/// Apply a shift to the expected cell map.
fn shift_model(model: &mut BTreeMap<(u32, u16), f64>, rows: bool, at: u32, delta: i64) {
    let mut next = BTreeMap::new();
    for (&(row, col), &value) in model.iter() {
        let key = if rows { row } else { u32::from(col) };
        let moved = if delta >= 0 {
            if key >= at { Some(key + delta as u32) } else { Some(key) }
        } else {
            let count = (-delta) as u32;
            if key < at {
                Some(key)
            } else if key < at + count {
                None
            } else {
                Some(key - count)
            }
        };
        if let Some(moved) = moved {
            let address = if rows { (moved, col) } else { (row, moved as u16) };
            next.insert(address, value);
        }
    }
    *model = next;
}

proptest! {
    #[test]
    fn prop_sheet_edits_keep_views_consistent(edits in prop::collection::vec(edit(), 1..60)) {
        let mut sheet = Worksheet::new(SheetId(0), "Prop");
        let mut model: BTreeMap<(u32, u16), f64> = BTreeMap::new();

        for edit in edits {
            match edit {
                Edit::Value(row, col, v) => {
                    sheet.add_value(row, col, CellValue::Number(f64::from(v)), 0).unwrap();
                    model.insert((row, col), f64::from(v));
                },
                Edit::Run(row, col, width) => {
                    let entries: Vec<(u16, f64)> = (0..width).map(|i| (0, f64::from(i))).collect();
                    let run = CellRecord::number_run(row, col, &entries).unwrap();
                    if sheet.add_cell(run).is_ok() {
                        for i in 0..u16::from(width) {
                            model.insert((row, col + i), f64::from(i));
                        }
                    }
                },
                Edit::Remove(row, col) => {
                    let removed = sheet.remove_cell(row, col).is_ok();
                    prop_assert_eq!(removed, model.remove(&(row, col)).is_some());
                },
                Edit::InsertRows(at, count) => {
                    sheet.insert_rows(at, count).unwrap();
                    shift_model(&mut model, true, at, i64::from(count));
                },
                Edit::DeleteRows(at, count) => {
                    sheet.delete_rows(at, count).unwrap();
                    shift_model(&mut model, true, at, -i64::from(count));
                },
                Edit::InsertCols(at, count) => {
                    sheet.insert_columns(at, count).unwrap();
                    shift_model(&mut model, false, u32::from(at), i64::from(count));
                },
                Edit::DeleteCols(at, count) => {
                    sheet.delete_columns(at, count).unwrap();
                    shift_model(&mut model, false, u32::from(at), -i64::from(count));
                },
            }
            prop_assert_eq!(sheet.cells().check_consistency(), Ok(()));
        }

        let covered: usize = sheet.cells().iter().map(|(_, cell)| usize::from(cell.width())).sum();
        prop_assert_eq!(covered, model.len());
        for (&(row, col), &value) in &model {
            prop_assert_eq!(sheet.cell_value(row, col).unwrap(), CellValue::Number(value));
        }
    }
}
