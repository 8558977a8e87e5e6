/// SAM output of basecalls with their reference mappings
use crate::decode::BasecallResult;
use crate::error::Error;
use crate::io::writer::ResultWriter;
use crate::mapping::Mapping;
use crate::signal::Read;
use bstr::BString;
use noodles::sam;
use noodles::sam::alignment::io::Write;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record::MappingQuality;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::alignment::record_buf::{QualityScores, RecordBuf, Sequence};
use noodles::sam::header::record::value::{map::Program, Map};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::num::NonZeroUsize;
use std::path::Path;

/// SAM writer for basecalls
pub struct SamWriter<W: std::io::Write> {
    writer: sam::io::Writer<W>,
    header: sam::Header,
    contigs: HashMap<String, usize>,
}

impl SamWriter<BufWriter<File>> {
    /// Create a SAM file with a header describing `references`
    pub fn create(path: &Path, references: &[(String, usize)]) -> Result<Self, Error> {
        let file = File::create(path).map_err(|e| Error::io(e, path))?;
        Self::new(BufWriter::new(file), references)
    }
}

impl<W: std::io::Write> SamWriter<W> {
    /// Wrap a byte sink and write the header
    ///
    /// # Arguments
    /// * `inner` - Output sink
    /// * `references` - Reference contigs (name, length) in index order
    pub fn new(inner: W, references: &[(String, usize)]) -> Result<Self, Error> {
        let header = build_sam_header(references)?;
        let contigs = references
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();

        let mut writer = sam::io::Writer::new(inner);
        writer.write_header(&header)?;

        Ok(Self {
            writer,
            header,
            contigs,
        })
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    /// Build the record for one result (without writing)
    pub fn build_record(&self, read: &Read, result: &BasecallResult) -> Result<RecordBuf, Error> {
        let quals = phred_scores(result.qstring.as_deref());
        match &result.mapping {
            Some(mapping) => self.mapped_record(read, result, mapping, quals),
            None => Ok(unmapped_record(read, result, quals)),
        }
    }

    fn mapped_record(
        &self,
        read: &Read,
        result: &BasecallResult,
        mapping: &Mapping,
        quals: Vec<u8>,
    ) -> Result<RecordBuf, Error> {
        let mut record = RecordBuf::default();
        record.name_mut().replace(BString::from(read.read_id.as_str()));

        let reverse = mapping.strand.is_reverse();
        *record.flags_mut() = if reverse {
            sam::alignment::record::Flags::REVERSE_COMPLEMENTED
        } else {
            sam::alignment::record::Flags::empty()
        };

        let contig = *self.contigs.get(&mapping.ctg).ok_or_else(|| {
            Error::Output(format!(
                "read {} maps to {} which is not in the header",
                read.read_id, mapping.ctg
            ))
        })?;
        *record.reference_sequence_id_mut() = Some(contig);

        let pos = mapping.r_st + 1;
        *record.alignment_start_mut() = Some(
            pos.try_into()
                .map_err(|e| Error::Output(format!("invalid alignment position {}: {}", pos, e)))?,
        );
        *record.mapping_quality_mut() = MappingQuality::new(mapping.mapq);
        *record.cigar_mut() = clipped_cigar(mapping, result.sequence.len())?;

        // Reverse-strand records carry the reverse complement and reversed qualities
        if reverse {
            *record.sequence_mut() = Sequence::from(reverse_complement(&result.sequence));
            let reversed: Vec<_> = quals.into_iter().rev().collect();
            *record.quality_scores_mut() = QualityScores::from(reversed);
        } else {
            *record.sequence_mut() = Sequence::from(result.sequence.as_bytes().to_vec());
            *record.quality_scores_mut() = QualityScores::from(quals);
        }

        record
            .data_mut()
            .insert(Tag::EDIT_DISTANCE, Value::from(mapping.nm as i32));
        Ok(record)
    }
}

impl<W: std::io::Write> ResultWriter for SamWriter<W> {
    fn write(&mut self, read: &Read, result: &BasecallResult) -> Result<(), Error> {
        let record = self.build_record(read, result)?;
        self.writer.write_alignment_record(&self.header, &record)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        std::io::Write::flush(self.writer.get_mut())?;
        Ok(())
    }
}

/// Build SAM header from reference contigs
pub fn build_sam_header(references: &[(String, usize)]) -> Result<sam::Header, Error> {
    let mut builder = sam::Header::builder();

    // @HD line (default version and unsorted)
    builder = builder.set_header(Default::default());

    // @SQ lines for each contig
    for (name, length) in references {
        let length_nz = NonZeroUsize::new(*length)
            .ok_or_else(|| Error::Output(format!("reference {} has zero length", name)))?;
        builder = builder.add_reference_sequence(
            name.as_str(),
            Map::<sam::header::record::value::map::ReferenceSequence>::new(length_nz),
        );
    }

    // @PG line
    builder = builder.add_program("rucall", Map::<Program>::default());

    Ok(builder.build())
}

fn unmapped_record(read: &Read, result: &BasecallResult, quals: Vec<u8>) -> RecordBuf {
    let mut record = RecordBuf::default();
    record.name_mut().replace(BString::from(read.read_id.as_str()));
    *record.flags_mut() = sam::alignment::record::Flags::UNMAPPED;
    *record.sequence_mut() = Sequence::from(result.sequence.as_bytes().to_vec());
    *record.quality_scores_mut() = QualityScores::from(quals);
    record
}

/// Raw phred scores of a FASTQ quality string (empty when absent)
fn phred_scores(qstring: Option<&str>) -> Vec<u8> {
    qstring
        .map(|q| q.bytes().map(|c| c.saturating_sub(33)).collect())
        .unwrap_or_default()
}

fn reverse_complement(seq: &str) -> Vec<u8> {
    seq.bytes()
        .rev()
        .map(|b| match b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => other,
        })
        .collect()
}

/// Parse a CIGAR string into (kind, length) pairs
fn parse_cigar(cigar: &str) -> Result<Vec<(Kind, usize)>, Error> {
    let mut ops = Vec::new();
    let mut len = 0usize;
    let mut have_len = false;
    for c in cigar.chars() {
        if let Some(d) = c.to_digit(10) {
            len = len * 10 + d as usize;
            have_len = true;
            continue;
        }
        let kind = match c {
            'M' => Kind::Match,
            'I' => Kind::Insertion,
            'D' => Kind::Deletion,
            'N' => Kind::Skip,
            'S' => Kind::SoftClip,
            'H' => Kind::HardClip,
            'P' => Kind::Pad,
            '=' => Kind::SequenceMatch,
            'X' => Kind::SequenceMismatch,
            _ => return Err(Error::Output(format!("invalid CIGAR operation '{}' in {}", c, cigar))),
        };
        if !have_len {
            return Err(Error::Output(format!("CIGAR operation without length in {}", cigar)));
        }
        ops.push((kind, len));
        len = 0;
        have_len = false;
    }
    if have_len {
        return Err(Error::Output(format!("trailing length in CIGAR {}", cigar)));
    }
    Ok(ops)
}

/// CIGAR of the whole query: soft clips around the mapped span
///
/// Clips are taken in reference orientation, so on the reverse strand the
/// query tail becomes the leading clip.
fn clipped_cigar(
    mapping: &Mapping,
    query_len: usize,
) -> Result<sam::alignment::record_buf::Cigar, Error> {
    let head = mapping.q_st;
    let tail = query_len.saturating_sub(mapping.q_en);
    let (lead, trail) = if mapping.strand.is_reverse() {
        (tail, head)
    } else {
        (head, tail)
    };

    let mut cigar = sam::alignment::record_buf::Cigar::default();
    if lead > 0 {
        cigar
            .as_mut()
            .push(sam::alignment::record::cigar::Op::new(Kind::SoftClip, lead));
    }
    for (kind, len) in parse_cigar(&mapping.cigar)? {
        cigar
            .as_mut()
            .push(sam::alignment::record::cigar::Op::new(kind, len));
    }
    if trail > 0 {
        cigar
            .as_mut()
            .push(sam::alignment::record::cigar::Op::new(Kind::SoftClip, trail));
    }
    Ok(cigar)
}
