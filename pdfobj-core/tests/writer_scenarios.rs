//! End-to-end output scenarios: byte layout of streams, object stream
//! batching and the two cross-reference forms.

use pdfobj::{
    DocId, Obj, PdfContext, PdfError, ReaderOptions, StreamFlags, Value, WriterConfig,
    OBJSTM_MAX_OBJECTS,
};
use std::io::Cursor;

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Writes a catalog and `dicts` numbered dictionaries. Returns the
/// output and the object number of each numbered dictionary.
fn write_document(config: &WriterConfig, dicts: usize) -> (Vec<u8>, Vec<u32>) {
    let mut ctx: PdfContext = PdfContext::new();
    ctx.open_session(Vec::new(), config).unwrap();

    let catalog = ctx.new_dict();
    ctx.dict_set(catalog, "Type", Value::name("Catalog")).unwrap();
    ctx.set_root(catalog).unwrap();

    let mut labels = Vec::with_capacity(dicts);
    for i in 0..dicts {
        let dict = ctx.new_dict();
        ctx.dict_set(dict, "I", Value::from(i)).unwrap();
        ctx.dict_set(dict, "Name", Value::string(format!("object {i}")))
            .unwrap();
        let reference = ctx.make_reference(dict).unwrap();
        labels.push(ctx.label(dict).unwrap());
        ctx.release(reference).unwrap();
        ctx.release(dict).unwrap();
    }

    ctx.release(catalog).unwrap();
    let output = ctx.close_session().unwrap();
    assert_eq!(ctx.live_objects(), 0);
    (output, labels)
}

fn open(reader: &mut PdfContext, data: Vec<u8>) -> DocId {
    reader
        .open_document("out.pdf", Cursor::new(data), &ReaderOptions::default())
        .unwrap()
}

fn read_numbered(reader: &mut PdfContext, doc: DocId, label: u32) -> (f64, Vec<u8>) {
    let dict = reader.get_object(doc, label, 0).unwrap().unwrap();
    let i = reader.dict_get(dict, "I").unwrap().unwrap();
    let name = reader.dict_get(dict, "Name").unwrap().unwrap();
    let value = (
        reader.number_value(i).unwrap(),
        reader.string_value(name).unwrap().to_vec(),
    );
    reader.release(dict).unwrap();
    value
}

#[test]
fn test_uncompressed_stream_bytes_follow_keyword() {
    let config = WriterConfig::default()
        .with_version(4)
        .with_compression_level(0);
    let mut ctx: PdfContext = PdfContext::new();
    ctx.open_session(Vec::new(), &config).unwrap();

    let catalog = ctx.new_dict();
    ctx.dict_set(catalog, "Type", Value::name("Catalog")).unwrap();
    ctx.set_root(catalog).unwrap();

    let page = ctx.new_dict();
    ctx.dict_set(page, "Type", Value::name("Page")).unwrap();
    let contents = ctx.new_stream(StreamFlags::COMPRESS);
    ctx.add_stream(contents, b"0123456789").unwrap();
    let contents_ref = ctx.make_reference(contents).unwrap();
    ctx.dict_set(page, "Contents", contents_ref).unwrap();
    let page_ref = ctx.make_reference(page).unwrap();
    ctx.dict_set(catalog, "Page", page_ref).unwrap();

    for obj in [contents, page, catalog] {
        ctx.release(obj).unwrap();
    }
    let output = ctx.close_session().unwrap();

    let start = find(&output, b"stream\n").unwrap() + b"stream\n".len();
    assert_eq!(&output[start..start + 10], b"0123456789");
    assert_eq!(&output[start + 10..start + 20], b"\nendstream");
    assert_eq!(count(&output, b" 0 obj\n"), 3);
    assert_eq!(count(&output, b"/Length 10>>"), 1);
}

#[test]
fn test_object_streams_hold_at_most_the_limit() {
    let config = WriterConfig::default().with_compression_level(0);
    // The catalog is the 205th packed object
    let (output, labels) = write_document(&config, 204);

    assert_eq!(count(&output, b"/Type/ObjStm"), 2);
    assert_eq!(count(&output, format!("/N {OBJSTM_MAX_OBJECTS}/").as_bytes()), 1);
    assert_eq!(count(&output, b"/N 5/"), 1);
    assert_eq!(count(&output, b"/Type/XRef"), 1);
    assert!(!output.windows(7).any(|w| w == b"trailer"));

    let mut reader: PdfContext = PdfContext::new();
    let doc = open(&mut reader, output);
    for (i, label) in labels.into_iter().enumerate() {
        let (number, name) = read_numbered(&mut reader, doc, label);
        assert_eq!(number, i as f64);
        assert_eq!(name, format!("object {i}").into_bytes());
    }
    let catalog = reader.document_catalog(doc).unwrap();
    let kind = reader.dict_get(catalog, "Type").unwrap().unwrap();
    assert_eq!(reader.name_value(kind).unwrap(), b"Catalog");
    reader.release(catalog).unwrap();
}

#[test]
fn test_compressed_object_streams_read_back() {
    let (output, labels) = write_document(&WriterConfig::default(), 30);
    assert_eq!(count(&output, b"/Type/ObjStm"), 1);

    let mut reader: PdfContext = PdfContext::new();
    let doc = open(&mut reader, output);
    assert_eq!(reader.document_version(doc).unwrap(), 5);
    let (number, _) = read_numbered(&mut reader, doc, labels[17]);
    assert_eq!(number, 17.0);
}

#[test]
fn test_table_and_stream_cross_references_agree() {
    let classic = WriterConfig::default().with_version(4);
    let streams = WriterConfig::default().with_version(6);
    let (classic_output, classic_labels) = write_document(&classic, 12);
    let (stream_output, stream_labels) = write_document(&streams, 12);

    assert!(find(&classic_output, b"\nxref\n0 ").is_some());
    assert!(find(&stream_output, b"/Type/XRef").is_some());
    // Object stream containers take numbers too
    assert_eq!(classic_labels.len(), stream_labels.len());

    let mut reader: PdfContext = PdfContext::new();
    let classic_doc = reader
        .open_document("classic.pdf", Cursor::new(classic_output), &ReaderOptions::default())
        .unwrap();
    let stream_doc = reader
        .open_document("stream.pdf", Cursor::new(stream_output), &ReaderOptions::default())
        .unwrap();
    assert_ne!(classic_doc, stream_doc);

    for (classic_label, stream_label) in classic_labels.into_iter().zip(stream_labels) {
        assert_eq!(
            read_numbered(&mut reader, classic_doc, classic_label),
            read_numbered(&mut reader, stream_doc, stream_label)
        );
    }
}

#[test]
fn test_encrypted_session_keeps_catalog_and_encrypt_out_of_object_streams() {
    struct Invert;
    impl pdfobj::EncryptionHook for Invert {
        fn set_label(&mut self, _label: u32, _generation: u16) {}
        fn encrypt(&mut self, data: &mut Vec<u8>) {
            for byte in data.iter_mut() {
                *byte = !*byte;
            }
        }
    }

    let mut ctx: PdfContext = PdfContext::new();
    let config = WriterConfig::default().with_compression_level(0);
    ctx.open_encrypted_session(Vec::new(), &config, Box::new(Invert))
        .unwrap();

    let catalog = ctx.new_dict();
    ctx.dict_set(catalog, "Type", Value::name("Catalog")).unwrap();
    ctx.set_root(catalog).unwrap();
    let encrypt = ctx.new_dict();
    ctx.dict_set(encrypt, "Filter", Value::name("Standard")).unwrap();
    ctx.dict_set(encrypt, "O", Value::string("owner")).unwrap();
    ctx.set_encrypt(encrypt).unwrap();
    assert!(matches!(ctx.set_encrypt(encrypt), Err(PdfError::AlreadySet("Encrypt"))));

    let info = ctx.new_dict();
    ctx.dict_set(info, "Title", Value::string("plain")).unwrap();
    ctx.set_info(info).unwrap();

    for obj in [info, encrypt, catalog] {
        ctx.release(obj).unwrap();
    }
    let output = ctx.close_session().unwrap();

    // Unencrypted Encrypt dictionary and catalog are top-level objects
    assert!(find(&output, b"/O(owner)").is_some());
    assert!(find(&output, b"<</Type/Catalog>>").is_some());
    assert!(find(&output, b"(plain)").is_none());
}

#[test]
fn test_file_identifier_and_statistics() {
    let mut ctx: PdfContext = PdfContext::new();
    let config = WriterConfig::default().with_version(4);
    ctx.open_session(Vec::new(), &config).unwrap();
    assert_eq!(ctx.version().unwrap(), 4);

    let id = ctx.new_array();
    ctx.array_push(id, Value::string([0x01u8, 0x02, 0x03])).unwrap();
    ctx.array_push(id, Value::string([0x01u8, 0x02, 0x03])).unwrap();
    ctx.set_id(id).unwrap();
    let another: Obj = ctx.new_array();
    assert!(matches!(ctx.set_id(another), Err(PdfError::AlreadySet("ID"))));
    ctx.release(another).unwrap();

    let catalog = ctx.new_dict();
    ctx.set_root(catalog).unwrap();
    let contents = ctx.new_stream(StreamFlags::COMPRESS);
    ctx.add_stream(contents, vec![b'x'; 4096]).unwrap();
    let contents_ref = ctx.make_reference(contents).unwrap();
    ctx.dict_set(catalog, "Data", contents_ref).unwrap();
    ctx.release(contents).unwrap();
    ctx.release(catalog).unwrap();

    assert!(ctx.compression_saved().unwrap() > 3000);
    let written = ctx.bytes_written().unwrap();
    let output = ctx.close_session().unwrap();
    assert!(output.len() as u64 > written);
    assert!(find(&output, b"/ID[<010203><010203>]").is_some());
    assert!(matches!(ctx.bytes_written(), Err(PdfError::NoSession)));
}
