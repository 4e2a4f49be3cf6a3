#[cfg(test)]
pub fn write_file(path: &std::path::Path, content: &str, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, content).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
}

#[cfg(test)]
pub fn setup_test_dir() -> anyhow::Result<tempfile::TempDir> {
    // create a temporary directory
    let tmp_dir = tempfile::tempdir()?;
    // foo
    // |- 0.txt
    // |- bar
    //    |- 1.txt
    //    |- 2.txt
    //    |- 3.txt
    // |- baz
    //    |- 4.txt
    // |- empty
    let foo_path = tmp_dir.path().join("foo");
    std::fs::create_dir(&foo_path)?;
    write_file(&foo_path.join("0.txt"), "0", 0o644);
    let bar_path = foo_path.join("bar");
    std::fs::create_dir(&bar_path)?;
    write_file(&bar_path.join("1.txt"), "1", 0o644);
    write_file(&bar_path.join("2.txt"), "2", 0o600);
    write_file(&bar_path.join("3.txt"), "3", 0o755);
    let baz_path = foo_path.join("baz");
    std::fs::create_dir(&baz_path)?;
    write_file(&baz_path.join("4.txt"), "4", 0o644);
    std::fs::create_dir(foo_path.join("empty"))?;
    Ok(tmp_dir)
}
