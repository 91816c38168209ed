//! Striping Integration Tests
//!
//! Stripe and unstripe through the concurrent pipeline, in memory and
//! against column files on disk.

use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use meldstripe::ec::BackendType;
use meldstripe::{ChannelStriper, Error, StripeLayout, StriperConfig};

// =============================================================================
// Helpers
// =============================================================================

/// Writer whose bytes stay reachable after the striper consumed it
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn bytes(&self) -> Vec<u8> {
        self.0.lock().expect("sink lock poisoned").clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("sink lock poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer that accepts `limit` bytes and then fails
struct FailingSink {
    limit: usize,
    written: usize,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written >= self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let n = buf.len().min(self.limit - self.written);
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Deterministic pseudo-random bytes
fn test_data(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

fn stripe_columns(striper: &mut ChannelStriper, data: &[u8]) -> Vec<Vec<u8>> {
    let sinks: Vec<SharedSink> = (0..striper.config().total_columns())
        .map(|_| SharedSink::default())
        .collect();
    let written = striper
        .stripe(Cursor::new(data.to_vec()), sinks.clone())
        .expect("Failed to stripe");
    assert_eq!(written, data.len() as u64);
    sinks.iter().map(SharedSink::bytes).collect()
}

fn unstripe_columns(
    striper: &mut ChannelStriper,
    columns: &[Option<Vec<u8>>],
    size: usize,
) -> meldstripe::Result<Vec<u8>> {
    let sink = SharedSink::default();
    let inputs = columns.iter().map(|c| c.clone().map(Cursor::new)).collect();
    let written = striper.unstripe(inputs, sink.clone(), size as u64)?;
    assert_eq!(written, size as u64);
    Ok(sink.bytes())
}

/// Every subset of `0..total` with at most `max` members
fn erasure_patterns(total: usize, max: usize) -> Vec<Vec<usize>> {
    (0u64..1 << total)
        .filter(|bits| bits.count_ones() as usize <= max)
        .map(|bits| (0..total).filter(|&i| bits & (1 << i) != 0).collect())
        .collect()
}

fn assert_round_trip(config: StriperConfig, len: usize) {
    let mut striper = ChannelStriper::new(config.clone()).expect("Failed to create striper");
    let data = test_data(len);
    let columns = stripe_columns(&mut striper, &data);

    let sizes: Vec<u64> = columns.iter().map(|c| c.len() as u64).collect();
    assert_eq!(
        sizes,
        config.layout(len as u64).column_sizes(),
        "{}+{} bs {} len {}",
        config.data_columns,
        config.checksum_columns,
        config.block_size,
        len
    );

    let all: Vec<Option<Vec<u8>>> = columns.into_iter().map(Some).collect();
    let restored = unstripe_columns(&mut striper, &all, len).expect("Failed to unstripe");
    assert!(restored == data, "round trip differs at len {}", len);
}

// =============================================================================
// Byte Exactness
// =============================================================================

#[test]
fn test_round_trip_default_shape() {
    let config = StriperConfig::new(5, 2);
    let bs = config.block_size;
    let frame = config.frame_data_size();
    for len in [
        0,
        1,
        2,
        bs - 1,
        bs,
        bs + 1,
        10 * bs + 5,
        11 * bs,
        11 * bs + 5,
        frame,
        frame + 1,
        3 * frame - 7,
    ] {
        assert_round_trip(config.clone(), len);
    }
}

#[test]
fn test_round_trip_tiny_blocks() {
    let config = StriperConfig::new(5, 2).with_block_size(3);
    for len in [0, 1, 2, 3, 14, 15, 16, 240, 241, 1000] {
        assert_round_trip(config.clone(), len);
    }
}

#[test]
fn test_round_trip_large_blocks() {
    let config = StriperConfig::new(5, 2).with_block_size(4096);
    for len in [4095, 4096, 5 * 4096 + 5, 16 * 5 * 4096 + 1] {
        assert_round_trip(config.clone(), len);
    }
}

#[test]
fn test_round_trip_wide_code() {
    let config = StriperConfig::new(20, 3).with_block_size(16);
    assert_round_trip(config, 700 * 16 + 5);
}

#[test]
fn test_round_trip_minimal_code() {
    let config = StriperConfig::new(2, 1).with_block_size(8).with_ring_buffer_size(1);
    for len in [0, 7, 8, 16, 255, 256, 257, 4000] {
        assert_round_trip(config.clone(), len);
    }
}

#[test]
fn test_columns_hold_distinct_blocks() {
    let config = StriperConfig::new(3, 2).with_block_size(16);
    let mut striper = ChannelStriper::new(config).expect("Failed to create striper");
    let data = test_data(3 * 16 * 4);
    let columns = stripe_columns(&mut striper, &data);

    assert_eq!(&columns[0][..16], &data[..16]);
    assert_eq!(&columns[1][..16], &data[16..32]);
    assert_eq!(&columns[2][..16], &data[32..48]);
    assert_eq!(&columns[0][16..32], &data[48..64]);
    assert_ne!(columns[0], columns[1]);
    assert_ne!(columns[3], columns[4]);
}

#[test]
fn test_narrow_field_rejected() {
    // Columns carry whole bytes; GF(2^4) would drop the high nibble
    let config = StriperConfig::new(4, 2).with_field_bits(4).with_block_size(8);
    assert_matches!(ChannelStriper::new(config), Err(Error::InvalidConfig(_)));
}

#[test]
fn test_unstripe_every_erasure_pattern() {
    for (k, m, bs, len) in [(5, 2, 16, 5 * 16 * 20 + 37), (3, 3, 8, 3 * 8 * 16 * 2 + 5)] {
        let config = StriperConfig::new(k, m).with_block_size(bs);
        let mut striper = ChannelStriper::new(config).expect("Failed to create striper");
        let data = test_data(len);
        let columns = stripe_columns(&mut striper, &data);

        for erased in erasure_patterns(k + m, m) {
            let damaged: Vec<Option<Vec<u8>>> = columns
                .iter()
                .enumerate()
                .map(|(c, bytes)| (!erased.contains(&c)).then(|| bytes.clone()))
                .collect();
            let restored = unstripe_columns(&mut striper, &damaged, len)
                .unwrap_or_else(|e| panic!("{}+{} erased {:?}: {}", k, m, erased, e));
            assert!(restored == data, "{}+{} erased {:?}", k, m, erased);
        }
    }
}

#[test]
fn test_unstripe_backends_agree() {
    let data = test_data(7 * 64 * 16 + 3);
    let mut outputs = Vec::new();
    for backend in [BackendType::Portable, BackendType::Accelerated] {
        let config = StriperConfig::new(7, 3).with_block_size(64).with_backend(backend);
        let mut striper = ChannelStriper::new(config).expect("Failed to create striper");
        let columns = stripe_columns(&mut striper, &data);

        let mut damaged: Vec<Option<Vec<u8>>> = columns.iter().cloned().map(Some).collect();
        damaged[1] = None;
        damaged[5] = None;
        damaged[8] = None;
        let restored = unstripe_columns(&mut striper, &damaged, data.len()).expect("Failed to unstripe");
        assert!(restored == data, "{} backend", backend);
        outputs.push(columns);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_unstripe_uncorrectable() {
    let mut striper = ChannelStriper::new(StriperConfig::new(5, 2)).expect("Failed to create striper");
    let data = test_data(3000);
    let columns = stripe_columns(&mut striper, &data);

    let damaged: Vec<Option<Vec<u8>>> = columns
        .into_iter()
        .enumerate()
        .map(|(c, bytes)| (![2, 4, 6].contains(&c)).then_some(bytes))
        .collect();
    assert_matches!(
        unstripe_columns(&mut striper, &damaged, data.len()),
        Err(Error::Uncorrectable {
            invalid: 3,
            correctable: 2
        })
    );
}

// =============================================================================
// Failure Handling
// =============================================================================

#[test]
fn test_failing_columns_are_aggregated() {
    let config = StriperConfig::new(3, 2).with_block_size(16);
    let mut striper = ChannelStriper::new(config).expect("Failed to create striper");

    let outputs: Vec<Box<dyn Write + Send>> = vec![
        Box::new(SharedSink::default()),
        Box::new(FailingSink { limit: 0, written: 0 }),
        Box::new(SharedSink::default()),
        Box::new(SharedSink::default()),
        Box::new(SharedSink::default()),
    ];
    let err = striper
        .stripe(Cursor::new(test_data(10_000)), outputs)
        .expect_err("Striping into a failing column should fail");

    assert!(err.is_io());
    let primary = match &err {
        Error::Pipeline { primary, .. } => primary.as_ref(),
        other => other,
    };
    assert_matches!(primary, Error::ColumnIo { column: 1, .. });
    assert!(err.to_string().contains("disk full"));
}

#[test]
fn test_failing_input_is_reported() {
    struct BrokenInput;

    impl io::Read for BrokenInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "source went away"))
        }
    }

    let mut striper = ChannelStriper::new(StriperConfig::new(3, 2)).expect("Failed to create striper");
    let err = striper
        .stripe(BrokenInput, (0..5).map(|_| SharedSink::default()).collect())
        .expect_err("Reading a broken input should fail");
    assert_matches!(err, Error::InputIo(e) if e.kind() == io::ErrorKind::ConnectionReset);
}

#[test]
fn test_failing_output_is_reported() {
    let config = StriperConfig::new(3, 1).with_block_size(8);
    let mut striper = ChannelStriper::new(config).expect("Failed to create striper");
    let data = test_data(2000);
    let columns: Vec<Option<Vec<u8>>> = stripe_columns(&mut striper, &data)
        .into_iter()
        .map(Some)
        .collect();

    let inputs = columns.into_iter().map(|c| c.map(Cursor::new)).collect();
    let err = striper
        .unstripe(inputs, FailingSink { limit: 100, written: 0 }, data.len() as u64)
        .expect_err("Writing to a failing output should fail");
    assert_matches!(err, Error::OutputIo(_));
}

// =============================================================================
// File-Backed Columns
// =============================================================================

#[test]
fn test_file_backed_columns() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = StriperConfig::new(4, 2).with_block_size(64);
    let data = test_data(4 * 64 * 16 * 3 + 1234);

    let paths: Vec<PathBuf> = (0..6).map(|c| dir.path().join(format!("column-{}", c))).collect();
    let outputs: Vec<File> = paths
        .iter()
        .map(|p| File::create(p).expect("Failed to create column file"))
        .collect();

    let mut striper = ChannelStriper::new(config.clone()).expect("Failed to create striper");
    let size = striper
        .stripe(Cursor::new(data.clone()), outputs)
        .expect("Failed to stripe");

    let layout = config.layout(size);
    for (c, path) in paths.iter().enumerate() {
        let len = fs::metadata(path).expect("Missing column file").len();
        assert_eq!(len, layout.column_size(c), "column {}", c);
    }

    fs::remove_file(&paths[0]).expect("Failed to remove column");
    fs::remove_file(&paths[4]).expect("Failed to remove column");
    let inputs: Vec<Option<File>> = paths.iter().map(|p| File::open(p).ok()).collect();

    let restored_path = dir.path().join("restored");
    let output = File::create(&restored_path).expect("Failed to create output");
    striper
        .unstripe(inputs, output, layout.size)
        .expect("Failed to unstripe");

    assert!(fs::read(&restored_path).expect("Missing output") == data);
}

#[test]
fn test_cli_round_trip() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("input.bin");
    let data = test_data(3 * 100 * 16 + 77);
    fs::write(&input, &data).expect("Failed to write input");
    let columns: Vec<PathBuf> = (0..5).map(|c| dir.path().join(format!("c{}", c))).collect();
    let layout_path = dir.path().join("input.layout.json");

    let status = Command::new(env!("CARGO_BIN_EXE_meldstripe"))
        .args(["--log-level", "warn", "stripe", "--data", "3", "--checksum", "2", "--block-size", "100"])
        .arg("--layout")
        .arg(&layout_path)
        .arg(&input)
        .args(&columns)
        .status()
        .expect("Failed to run meldstripe stripe");
    assert!(status.success());

    let layout: StripeLayout = serde_json::from_str(
        &fs::read_to_string(&layout_path).expect("Missing layout file"),
    )
    .expect("Invalid layout file");
    assert_eq!(layout, StripeLayout::new(3, 2, 100, data.len() as u64));

    fs::remove_file(&columns[1]).expect("Failed to remove column");
    let output = dir.path().join("output.bin");
    let status = Command::new(env!("CARGO_BIN_EXE_meldstripe"))
        .args(["--log-level", "warn", "unstripe", "--layout"])
        .arg(&layout_path)
        .arg("--output")
        .arg(&output)
        .args(&columns)
        .status()
        .expect("Failed to run meldstripe unstripe");
    assert!(status.success());

    assert!(fs::read(&output).expect("Missing output") == data);
}

#[test]
fn test_cli_rejects_mismatched_data_count() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("input.bin");
    fs::write(&input, test_data(1000)).expect("Failed to write input");
    let columns: Vec<PathBuf> = (0..5).map(|c| dir.path().join(format!("c{}", c))).collect();

    let status = Command::new(env!("CARGO_BIN_EXE_meldstripe"))
        .args(["--log-level", "error", "stripe", "-d", "4", "-m", "2"])
        .arg(&input)
        .args(&columns)
        .stderr(std::process::Stdio::null())
        .status()
        .expect("Failed to run meldstripe stripe");

    assert!(!status.success());
    assert!(!columns[0].exists());
    assert!(!dir.path().join("input.bin.layout.json").exists());
}
