use bytes::Bytes;
use futures_util::StreamExt;
use kiro_bridge::eventstream::{encode_event_frame, encode_frame, frame_stream, Frame};
use kiro_bridge::{BridgeError, FrameDecoder, FrameError};

fn sample_frames(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let payload = format!(r#"{{"content":"chunk {i} {}"}}"#, "x".repeat(i * 7));
            encode_event_frame("assistantResponseEvent", payload.as_bytes())
        })
        .collect()
}

fn payloads(frames: &[Frame]) -> Vec<String> {
    frames
        .iter()
        .map(|f| String::from_utf8(f.payload.to_vec()).expect("utf8 payload"))
        .collect()
}

fn decode_in_chunks(bytes: &[u8], chunk_len: usize) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    for chunk in bytes.chunks(chunk_len) {
        decoder.feed(chunk);
        decoder
            .decode_ready_frames_into(&mut frames)
            .expect("no fatal error");
    }
    assert_eq!(decoder.buffered_len(), 0);
    frames
}

#[test]
fn test_chunk_boundaries_do_not_change_output() {
    let encoded = sample_frames(12);
    let stream: Vec<u8> = encoded.concat();

    let whole = decode_in_chunks(&stream, stream.len());
    assert_eq!(whole.len(), 12);

    for chunk_len in [1, 2, 3, 5, 11, 16, 17, 64, 255] {
        let split = decode_in_chunks(&stream, chunk_len);
        assert_eq!(split, whole, "chunk_len={chunk_len}");
    }

    assert_eq!(whole[3].event_type(), Some("assistantResponseEvent"));
    assert_eq!(whole[3].message_type(), Some("event"));
    assert_eq!(payloads(&whole)[0], r#"{"content":"chunk 0 "}"#);
}

#[test]
fn test_corruption_at_frame_boundaries_loses_at_most_one_frame_each() {
    let encoded = sample_frames(10);
    let originals: Vec<String> = encoded
        .iter()
        .map(|bytes| {
            let mut decoder = FrameDecoder::new();
            decoder.feed(bytes);
            payloads(&decoder.decode_ready_frames().expect("decode"))[0].clone()
        })
        .collect();

    // Flip the first byte of frames 2, 5 and 9.
    let corrupted_frames = [2usize, 5, 9];
    let mut stream = Vec::new();
    for (i, frame) in encoded.iter().enumerate() {
        let mut frame = frame.clone();
        if corrupted_frames.contains(&i) {
            frame[0] ^= 0x5a;
        }
        stream.extend_from_slice(&frame);
    }

    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    for chunk in stream.chunks(37) {
        decoder.feed(chunk);
        decoder
            .decode_ready_frames_into(&mut frames)
            .expect("corruption never becomes fatal");
    }

    let got = payloads(&frames);
    assert!(got.len() >= originals.len() - corrupted_frames.len());
    assert!(got.len() <= originals.len());
    assert!(decoder.resync_count() > 0);

    // Survivors keep their order and are all genuine.
    let mut cursor = originals.iter();
    for payload in &got {
        assert!(
            cursor.any(|original| original == payload),
            "unexpected or reordered payload {payload}"
        );
    }
    for i in [0usize, 1, 3, 4, 6, 7, 8] {
        assert!(got.contains(&originals[i]), "intact frame {i} was lost");
    }
}

#[test]
fn test_garbage_between_frames_is_skipped() {
    let encoded = sample_frames(3);
    let mut stream = encoded[0].clone();
    stream.extend_from_slice(b"\x00\x01garbage\xff\xfe");
    stream.extend_from_slice(&encoded[1]);
    stream.extend_from_slice(&[0u8; 40]);
    stream.extend_from_slice(&encoded[2]);

    let mut decoder = FrameDecoder::new();
    decoder.feed(&stream);
    let frames = decoder.decode_ready_frames().expect("decode");
    assert_eq!(frames.len(), 3);
    assert_eq!(decoder.buffered_len(), 0);
}

#[test]
fn test_truncated_frame_waits_for_the_rest() {
    let frame = encode_event_frame("assistantResponseEvent", br#"{"content":"hello"}"#);
    let (head, tail) = frame.split_at(frame.len() - 6);

    let mut decoder = FrameDecoder::new();
    decoder.feed(head);
    assert!(decoder.decode_ready_frames().expect("decode").is_empty());
    assert_eq!(decoder.buffered_len(), head.len());

    decoder.feed(tail);
    let frames = decoder.decode_ready_frames().expect("decode");
    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0].payload[..], br#"{"content":"hello"}"#);
    assert_eq!(decoder.buffered_len(), 0);
}

#[test]
fn test_oversized_length_is_fatal() {
    let mut decoder = FrameDecoder::new().with_max_frame_len(64);
    let big = encode_frame(&[(":event-type", "assistantResponseEvent")], &[b'a'; 128]);
    decoder.feed(&big);
    assert!(matches!(
        decoder.decode_ready_frames(),
        Err(FrameError::FrameTooLarge { limit: 64, .. })
    ));
}

#[tokio::test]
async fn test_frame_stream_over_split_body() {
    let stream_bytes: Vec<u8> = sample_frames(4).concat();
    let chunks: Vec<Result<Bytes, std::io::Error>> = stream_bytes
        .chunks(9)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    let frames: Vec<Result<Frame, BridgeError>> =
        frame_stream(futures_util::stream::iter(chunks)).collect().await;
    assert_eq!(frames.len(), 4);
    assert!(frames.iter().all(Result::is_ok));
}
