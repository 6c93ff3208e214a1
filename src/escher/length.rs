//! Container length engine.
//!
//! Every container declares the byte length of its content:
//!
//! ```text
//! declared = Σ (8 + child.declared) + 8 * has_undo_info + 8 * has_attached_text
//! ```
//!
//! and the innermost open container of a sheet drawing additionally covers
//! the shape containers stored in later drawing records. Those bytes, and
//! the workbook-wide shape counters written into the `Dg` atom, are not
//! derivable from the header record alone and are passed in as
//! [`DrawingTotals`].

use super::record::{EscherError, EscherResult, HEADER_SIZE};
use super::tree::{EscherContainer, EscherNode};
use super::types::EscherRecordType;

const HEADER: u32 = HEADER_SIZE as u32;

/// Inputs supplied by the owner of the drawing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawingTotals {
    /// Bytes (headers included) of the shape containers that live outside
    /// the header record
    pub external_container_bytes: u32,
    /// Number of shapes in the drawing, the patriarch included
    pub shape_count: u32,
    /// Last shape id allocated to the drawing
    pub last_shape_id: u32,
}

/// Padding a container declares beyond its children.
#[inline]
pub fn extra_len(container: &EscherContainer) -> u32 {
    HEADER * u32::from(container.has_undo_info) + HEADER * u32::from(container.has_attached_text)
}

/// Recompute every declared length under `node`, bottom-up, without
/// external bytes. Returns the node's declared length.
pub fn recompute(node: &mut EscherNode) -> u32 {
    fix(node, 0)
}

fn has_open(node: &EscherNode) -> bool {
    match node {
        EscherNode::Atom(_) => false,
        EscherNode::Container(container) => container.open || container.children.iter().any(has_open),
    }
}

/// Child through which the external bytes are counted: the last one
/// holding an open container.
fn open_chain(container: &EscherContainer) -> Option<usize> {
    container.children.iter().rposition(has_open)
}

fn fix(node: &mut EscherNode, external: u32) -> u32 {
    match node {
        EscherNode::Atom(atom) => {
            atom.header.length = atom.data.len() as u32;
            atom.header.length
        },
        EscherNode::Container(container) => {
            let chain = open_chain(container);
            let mut total = 0u32;
            for (i, child) in container.children.iter_mut().enumerate() {
                let share = if chain == Some(i) { external } else { 0 };
                total += HEADER + fix(child, share);
            }
            total += extra_len(container);
            if container.open && chain.is_none() {
                total += external;
            }
            container.header.length = total;
            total
        },
    }
}

/// Repair a sheet drawing's header tree.
///
/// `root` must be the sheet's `DgContainer`. All lengths are recomputed
/// bottom-up with `totals.external_container_bytes` folded into the
/// innermost open container, and the `Dg` atom receives the shape count
/// and last shape id.
pub fn update_drawing_header(root: &mut EscherNode, totals: &DrawingTotals) -> EscherResult<()> {
    if root.kind() != EscherRecordType::DgContainer {
        return Err(EscherError::UnexpectedRecord {
            expected: EscherRecordType::DgContainer.into(),
            found: root.header().record_type,
        });
    }
    if let Some(EscherNode::Atom(dg)) = root
        .as_container_mut()
        .and_then(|c| c.child_mut(EscherRecordType::Dg))
    {
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&totals.shape_count.to_le_bytes());
        data.extend_from_slice(&totals.last_shape_id.to_le_bytes());
        dg.data = data;
    } else {
        return Err(EscherError::Invalid("drawing container has no Dg atom".into()));
    }
    fix(root, totals.external_container_bytes);
    Ok(())
}

/// Check the length invariant at every level under `node`.
pub fn check_lengths(node: &EscherNode, external: u32) -> Result<(), String> {
    check(node, external)
}

fn check(node: &EscherNode, external: u32) -> Result<(), String> {
    match node {
        EscherNode::Atom(atom) => {
            if atom.header.length as usize != atom.data.len() {
                return Err(format!(
                    "atom 0x{:04X} declares {} bytes, holds {}",
                    atom.header.record_type,
                    atom.header.length,
                    atom.data.len()
                ));
            }
            Ok(())
        },
        EscherNode::Container(container) => {
            let chain = open_chain(container);
            let mut expected = extra_len(container);
            for (i, child) in container.children.iter().enumerate() {
                check(child, if chain == Some(i) { external } else { 0 })?;
                expected += HEADER + child.declared_len();
            }
            if container.open && chain.is_none() {
                expected += external;
            }
            if container.header.length != expected {
                return Err(format!(
                    "container 0x{:04X} declares {} bytes, expected {}",
                    container.header.record_type, container.header.length, expected
                ));
            }
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escher::tree::EscherAtom;
    use proptest::prelude::*;

    fn leaf(len: usize) -> EscherNode {
        EscherAtom::new(0, 0, 0xF011, vec![0; len]).into()
    }

    #[test]
    fn test_bottom_up_with_padding() {
        let mut shape = EscherContainer::new(EscherRecordType::SpContainer, 0)
            .with_child(leaf(8))
            .with_child(leaf(0));
        shape.has_attached_text = true;
        let mut group = EscherContainer::new(EscherRecordType::SpgrContainer, 0).with_child(shape);
        group.has_undo_info = true;
        let mut root: EscherNode = group.into();

        // shape: 16 + 8 + 8 = 32; group: 8 + 32 + 8 = 48
        assert_eq!(recompute(&mut root), 48);
        check_lengths(&root, 0).unwrap();
    }

    #[test]
    fn test_drawing_header_folds_external_totals() {
        let patriarch = EscherContainer::new(EscherRecordType::SpContainer, 0).with_child(leaf(16));
        let mut group = EscherContainer::new(EscherRecordType::SpgrContainer, 0).with_child(patriarch);
        group.open = true;
        let mut dg = EscherContainer::new(EscherRecordType::DgContainer, 1)
            .with_child(EscherAtom::new(0, 1, 0xF008, vec![0; 8]))
            .with_child(group);
        dg.open = true;
        let mut root: EscherNode = dg.into();

        let totals = DrawingTotals {
            external_container_bytes: 120,
            shape_count: 3,
            last_shape_id: 1026,
        };
        update_drawing_header(&mut root, &totals).unwrap();
        // patriarch 24; group 32 + 120 = 152; dg 16 + 160 = 176
        assert_eq!(root.declared_len(), 176);
        check_lengths(&root, 120).unwrap();
        let dg = root.as_container().unwrap();
        assert_eq!(
            dg.atom_data(EscherRecordType::Dg).unwrap(),
            &[3, 0, 0, 0, 0x02, 0x04, 0, 0]
        );
    }

    #[test]
    fn test_external_bytes_follow_one_open_chain() {
        let mut first = EscherContainer::new(EscherRecordType::SpgrContainer, 0).with_child(leaf(4));
        first.open = true;
        let mut second = EscherContainer::new(EscherRecordType::SpgrContainer, 0).with_child(leaf(4));
        second.open = true;
        let mut dg = EscherContainer::new(EscherRecordType::DgContainer, 1)
            .with_child(EscherAtom::new(0, 1, 0xF008, vec![0; 8]))
            .with_child(first)
            .with_child(second);
        dg.open = true;
        let mut root: EscherNode = dg.into();

        let totals = DrawingTotals {
            external_container_bytes: 100,
            shape_count: 1,
            last_shape_id: 1024,
        };
        update_drawing_header(&mut root, &totals).unwrap();
        let groups: Vec<u32> = root
            .as_container()
            .unwrap()
            .children
            .iter()
            .skip(1)
            .map(EscherNode::declared_len)
            .collect();
        // first 12; second 12 + 100
        assert_eq!(groups, vec![12, 112]);
        // dg 16 + 20 + 120
        assert_eq!(root.declared_len(), 156);
        check_lengths(&root, 100).unwrap();
    }

    #[test]
    fn test_header_requires_dg_container() {
        let mut node: EscherNode = EscherContainer::new(EscherRecordType::SpContainer, 0).into();
        assert!(update_drawing_header(&mut node, &DrawingTotals::default()).is_err());
    }

    #[derive(Debug, Clone)]
    enum Edit {
        AddAtom(usize, usize),
        AddContainer(usize),
        Remove(usize),
        MarkUndo(usize),
        MarkText(usize),
    }

    fn edit() -> impl Strategy<Value = Edit> {
        prop_oneof![
            (0usize..16, 0usize..40).prop_map(|(at, len)| Edit::AddAtom(at, len)),
            (0usize..16).prop_map(Edit::AddContainer),
            (0usize..16).prop_map(Edit::Remove),
            (0usize..16).prop_map(Edit::MarkUndo),
            (0usize..16).prop_map(Edit::MarkText),
        ]
    }

    fn container_paths(node: &EscherNode, path: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if let EscherNode::Container(c) = node {
            out.push(path.clone());
            for (i, child) in c.children.iter().enumerate() {
                path.push(i);
                container_paths(child, path, out);
                path.pop();
            }
        }
    }

    fn container_at<'a>(node: &'a mut EscherNode, path: &[usize]) -> Option<&'a mut EscherContainer> {
        let container = node.as_container_mut()?;
        match path.split_first() {
            None => Some(container),
            Some((&i, rest)) => container_at(container.children.get_mut(i)?, rest),
        }
    }

    fn apply(root: &mut EscherNode, edit: &Edit) {
        let mut paths = Vec::new();
        container_paths(root, &mut Vec::new(), &mut paths);
        let index = match edit {
            Edit::AddAtom(i, _)
            | Edit::AddContainer(i)
            | Edit::Remove(i)
            | Edit::MarkUndo(i)
            | Edit::MarkText(i) => *i,
        };
        let Some(target) = container_at(root, &paths[index % paths.len()]) else {
            return;
        };
        match edit {
            Edit::AddAtom(_, len) => target.children.push(leaf(*len)),
            Edit::AddContainer(_) => target
                .children
                .push(EscherContainer::new(EscherRecordType::SpContainer, 0).into()),
            Edit::Remove(_) => {
                target.children.pop();
            },
            Edit::MarkUndo(_) => target.has_undo_info = true,
            Edit::MarkText(_) => target.has_attached_text = true,
        }
    }

    proptest! {
        #[test]
        fn prop_lengths_hold_after_edits(
            edits in prop::collection::vec(edit(), 1..40),
            external in 0u32..5000,
        ) {
            let mut group = EscherContainer::new(EscherRecordType::SpgrContainer, 0);
            group.open = true;
            let mut dg = EscherContainer::new(EscherRecordType::DgContainer, 1)
                .with_child(EscherAtom::new(0, 1, 0xF008, vec![0; 8]))
                .with_child(group);
            dg.open = true;
            let mut root: EscherNode = dg.into();
            for edit in &edits {
                apply(&mut root, edit);
            }
            // keep the Dg atom in place for the header update
            if root.as_container().and_then(|c| c.child(EscherRecordType::Dg)).is_none() {
                if let Some(c) = root.as_container_mut() {
                    c.children.insert(0, EscherAtom::new(0, 1, 0xF008, vec![0; 8]).into());
                }
            }
            let totals = DrawingTotals { external_container_bytes: external, shape_count: 1, last_shape_id: 1025 };
            update_drawing_header(&mut root, &totals).unwrap();
            prop_assert_eq!(check_lengths(&root, external), Ok(()));
        }
    }
}
