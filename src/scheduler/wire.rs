use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SchedulerError};
use crate::scheduler::capability::JobIntrospector;
use crate::scheduler::cluster_job::ClusterJob;
use crate::scheduler::packet::JobPacket;

/// Keyed-document form of a [`JobPacket`], as carried between invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacketDocument {
    #[serde(default)]
    pub jobs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Value>,
    #[serde(rename = "subJob", default, skip_serializing_if = "Option::is_none")]
    pub sub_job: Option<Value>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(rename = "maxNext", default)]
    pub max_next: Option<usize>,
    #[serde(default)]
    pub id: u64,
}

impl<J> JobPacket<J> {
    /// Rebuild a packet from its document form.
    ///
    /// `next` and `maxNext` are required. The rebuilt packet gets a fresh id;
    /// the document's `id` is informational only.
    pub fn from_document(doc: &Value, introspector: &dyn JobIntrospector<J>) -> Result<Self> {
        let doc: PacketDocument = serde_json::from_value(doc.clone())
            .map_err(|e| SchedulerError::Decode(format!("invalid packet document: {}", e)))?;

        let next = doc.next.ok_or(SchedulerError::MissingField("next"))?;
        let max_next = doc.max_next.ok_or(SchedulerError::MissingField("maxNext"))?;

        let job = match doc.job.as_ref() {
            Some(raw) if !raw.is_null() => introspector.decode_cluster_job(raw)?,
            _ => ClusterJob::default(),
        };
        let sub_job = match doc.sub_job.as_ref() {
            Some(raw) if !raw.is_null() => Some(introspector.decode_cluster_job(raw)?),
            _ => None,
        };
        let jobs = introspector.decode_jobs(&doc.jobs)?;

        tracing::debug!(
            origin_packet_id = doc.id,
            next = %next,
            jobs = jobs.len(),
            "Packet decoded"
        );

        let mut packet = JobPacket::new(next, max_next, job).with_jobs(jobs);
        if let Some(sub_job) = sub_job {
            packet = packet.with_sub_job(sub_job);
        }
        Ok(packet)
    }
}

impl<J: Clone> JobPacket<J> {
    pub fn to_document(&self, introspector: &dyn JobIntrospector<J>) -> Result<Value> {
        let jobs = self
            .jobs()
            .iter()
            .map(|job| introspector.encode_job(job))
            .collect::<Result<Vec<_>>>()?;

        let doc = PacketDocument {
            jobs,
            job: Some(serde_json::to_value(self.job())?),
            sub_job: self.sub_job().map(serde_json::to_value).transpose()?,
            next: Some(self.next().to_string()),
            max_next: Some(self.max_batch()),
            id: self.id(),
        };
        Ok(serde_json::to_value(doc)?)
    }
}
