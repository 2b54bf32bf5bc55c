//! Split parent reassembly from a link object

use bytes::BytesMut;
use casnode_common::{Address, ChecksumCalculator, Error, Object, ObjectId, Result};
use tracing::debug;

/// Rebuild the parent at `parent` from link `link_id` and its children
///
/// `fetch` resolves a child or the link by address. Returns `Ok(None)` when
/// the link or any listed child is unavailable, so the caller can report the
/// parent as incomplete. A chain that resolves but does not add up to the
/// parent header is corruption.
pub fn reassemble<F>(parent: &Address, link_id: ObjectId, mut fetch: F) -> Result<Option<Object>>
where
    F: FnMut(&Address) -> Result<Option<Object>>,
{
    let Some(link) = fetch(&Address::new(parent.container, link_id))? else {
        return Ok(None);
    };
    let split = match &link.header.split {
        Some(split) if link.header.is_link() && split.parent_id == parent.object => split,
        _ => {
            return Err(Error::invalid_object(format!(
                "{link_id} is not a link object of {parent}"
            )));
        }
    };
    let Some(header) = split.parent.as_deref() else {
        return Err(Error::invalid_object(format!(
            "link object {link_id} carries no parent header"
        )));
    };

    // sized by the children actually read, never by the claimed header size
    let mut payload = BytesMut::new();
    let mut checksum = ChecksumCalculator::new();
    for child_id in &split.children {
        let Some(child) = fetch(&Address::new(parent.container, *child_id))? else {
            debug!("child {} of {} is unavailable", child_id, parent);
            return Ok(None);
        };
        checksum.update(&child.payload);
        if checksum.len() > header.payload_size {
            return Err(Error::DataCorruption(format!(
                "children of {parent} exceed the parent header size {}",
                header.payload_size
            )));
        }
        payload.extend_from_slice(&child.payload);
    }

    if checksum.len() != header.payload_size {
        return Err(Error::DataCorruption(format!(
            "children of {parent} hold {} bytes, parent header says {}",
            checksum.len(),
            header.payload_size
        )));
    }
    let actual = checksum.finalize();
    if actual != header.payload_checksum {
        return Err(Error::ChecksumMismatch {
            expected: format!("{:?}", header.payload_checksum),
            actual: format!("{actual:?}"),
        });
    }

    debug!("reassembled {} from {} children", parent, split.children.len());
    Ok(Some(Object::from_parts(
        parent.object,
        header.clone(),
        payload.freeze(),
    )))
}
