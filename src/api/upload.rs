//! multipart 上传处理
//!
//! 每个文件字段以唯一文件名流式写入上传目录；请求被拒绝时已写入的文件全部删除。

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use axum::extract::Multipart;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::ApiError;
use crate::orchestrator::{BatchRequest, UploadedArchive};
use crate::workflow::label_from_file_name;

const SOLUTION_FIELD: &str = "solution";
const STUDENT_FIELD: &str = "student";

/// 保存上传的压缩包并组装比对请求
pub async fn save_request(uploads_dir: &Path, multipart: Multipart) -> Result<BatchRequest, ApiError> {
    let mut saved = Vec::new();
    let result = collect(uploads_dir, multipart, &mut saved).await;
    if result.is_err() {
        for path in &saved {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!("删除上传文件 {} 失败: {}", path.display(), e);
            }
        }
    }
    result
}

async fn collect(
    uploads_dir: &Path,
    mut multipart: Multipart,
    saved: &mut Vec<PathBuf>,
) -> Result<BatchRequest, ApiError> {
    let mut solution: Option<UploadedArchive> = None;
    let mut students = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("无法解析上传内容: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != SOLUTION_FIELD && name != STUDENT_FIELD {
            debug!("忽略未知字段 {}", name);
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let path = uploads_dir.join(format!("{}.zip", Uuid::new_v4()));
        saved.push(path.clone());
        write_field(field, &path).await?;

        if name == SOLUTION_FIELD {
            if solution.is_some() {
                return Err(ApiError::BadRequest("只能上传一个 solution".to_string()));
            }
            solution = Some(UploadedArchive {
                path,
                label: "solution".to_string(),
            });
        } else {
            let label = label_from_file_name(file_name.as_deref(), students.len() + 1);
            students.push(UploadedArchive { path, label });
        }
    }

    let solution = solution.ok_or_else(|| ApiError::BadRequest("缺少 solution 文件".to_string()))?;
    if students.is_empty() {
        return Err(ApiError::BadRequest("至少需要一个 student 文件".to_string()));
    }

    Ok(BatchRequest { solution, students })
}

async fn write_field(mut field: Field<'_>, path: &Path) -> Result<(), ApiError> {
    let internal = |e: std::io::Error| ApiError::Internal(format!("保存上传文件失败: {}", e));

    let mut file = tokio::fs::File::create(path).await.map_err(internal)?;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("上传中断: {}", e)))?
    {
        file.write_all(&chunk).await.map_err(internal)?;
    }
    file.flush().await.map_err(internal)?;
    Ok(())
}
