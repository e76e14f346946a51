use std::io::Write;

use cualloc::CoreSnapshot;

/// Writes the snapshot as pretty-printed JSON followed by a newline.
pub fn write_snapshot_json(snapshot: &CoreSnapshot, mut writer: impl Write) -> crate::Result<()> {
    serde_json::to_writer_pretty(&mut writer, snapshot)?;
    writer.write_all(b"\n")?;
    Ok(())
}
