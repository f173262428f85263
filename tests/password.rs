//! Encrypted content and encrypted headers.

use std::io::Cursor;

use heptane::{Error, NewEntry, Password, Reader, ReaderOptions, WriteOptions, Writer};

fn encrypted_archive(options: WriteOptions) -> Vec<u8> {
    let mut writer = Writer::create(Cursor::new(Vec::new()), options).unwrap();
    writer
        .add_bytes(NewEntry::file("secret.txt"), b"the cake is a lie")
        .unwrap();
    writer
        .add_bytes(NewEntry::file("second.txt"), b"another secret body")
        .unwrap();
    let (sink, _) = writer.finish().unwrap();
    sink.into_inner()
}

fn read_all(data: Vec<u8>, options: ReaderOptions) -> heptane::Result<Vec<Vec<u8>>> {
    let mut reader = Reader::open(Cursor::new(data), options)?;
    let mut contents = Vec::new();
    while reader.next_entry()?.is_some() {
        contents.push(reader.read_to_vec()?);
    }
    Ok(contents)
}

#[test]
fn content_encryption_roundtrip() {
    let data = encrypted_archive(WriteOptions::new().password(Password::new("pw")));

    let contents = read_all(
        data,
        ReaderOptions::new().password(Password::new("pw")),
    )
    .unwrap();
    assert_eq!(contents[0], b"the cake is a lie");
    assert_eq!(contents[1], b"another secret body");
}

#[test]
fn content_without_password_fails() {
    let data = encrypted_archive(WriteOptions::new().password(Password::new("pw")));

    // The entry table itself is readable; the content is not.
    let err = read_all(data, ReaderOptions::default()).unwrap_err();
    assert!(matches!(err, Error::PasswordRequired));
}

#[test]
fn content_with_wrong_password_fails() {
    let data = encrypted_archive(WriteOptions::new().password(Password::new("pw")));

    let err = read_all(
        data,
        ReaderOptions::new().password(Password::new("not pw")),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Corrupt(_) | Error::Crypto(_)));
}

#[test]
fn plain_header_keeps_names_visible() {
    let data = encrypted_archive(WriteOptions::new().password(Password::new("pw")));
    let reader = Reader::open(Cursor::new(data), ReaderOptions::default()).unwrap();
    assert_eq!(reader.entries()[0].name, "secret.txt");
}

#[test]
fn encrypted_header_roundtrip() {
    let data = encrypted_archive(
        WriteOptions::new()
            .password(Password::new("pw"))
            .encrypt_header(true),
    );

    // The next header must be an encoded one: its first byte after the
    // signature region is kEncodedHeader.
    let next_offset = u64::from_le_bytes(data[12..20].try_into().unwrap());
    assert_eq!(data[32 + next_offset as usize], 0x17);

    let contents = read_all(
        data,
        ReaderOptions::new().password(Password::new("pw")),
    )
    .unwrap();
    assert_eq!(contents[0], b"the cake is a lie");
}

#[test]
fn encrypted_header_hides_names() {
    let data = encrypted_archive(
        WriteOptions::new()
            .password(Password::new("pw"))
            .encrypt_header(true),
    );

    // The UTF-16LE form of the first entry name must not appear anywhere.
    let needle: Vec<u8> = "secret.txt"
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();
    assert!(!data.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn encrypted_header_wrong_password_never_parses() {
    let data = encrypted_archive(
        WriteOptions::new()
            .password(Password::new("pw"))
            .encrypt_header(true),
    );

    let err = Reader::open(
        Cursor::new(data.clone()),
        ReaderOptions::new().password(Password::new("wrong")),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Corrupt(_) | Error::Crypto(_)));

    let err = Reader::open(Cursor::new(data), ReaderOptions::default()).unwrap_err();
    assert!(matches!(err, Error::PasswordRequired));
}

#[test]
fn compressed_header_roundtrip() {
    let data = encrypted_archive(
        WriteOptions::new()
            .password(Password::new("pw"))
            .compress_header(true),
    );

    let contents = read_all(
        data,
        ReaderOptions::new().password(Password::new("pw")),
    )
    .unwrap();
    assert_eq!(contents.len(), 2);
}

#[test]
fn compressed_and_encrypted_header_roundtrip() {
    let data = encrypted_archive(
        WriteOptions::new()
            .password(Password::new("pw"))
            .compress_header(true)
            .encrypt_header(true),
    );

    let contents = read_all(
        data,
        ReaderOptions::new().password(Password::new("pw")),
    )
    .unwrap();
    assert_eq!(contents[1], b"another secret body");
}

#[test]
fn compressed_header_without_password_works() {
    // Header compression alone needs no password at all.
    let mut writer = Writer::create(
        Cursor::new(Vec::new()),
        WriteOptions::new().compress_header(true),
    )
    .unwrap();
    writer
        .add_bytes(NewEntry::file("plain.txt"), b"plain content")
        .unwrap();
    let (sink, _) = writer.finish().unwrap();

    let contents = read_all(sink.into_inner(), ReaderOptions::default()).unwrap();
    assert_eq!(contents[0], b"plain content");
}

#[test]
fn header_encryption_without_password_is_illegal() {
    let err = Writer::create(
        Cursor::new(Vec::new()),
        WriteOptions::new().encrypt_header(true),
    )
    .map(|_| ())
    .unwrap_err();
    assert!(matches!(err, Error::IllegalArgument(_)));
}
