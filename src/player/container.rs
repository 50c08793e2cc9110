use crate::core::{BufferFlags, Result, SeekMode, TrackFormat};

/// 容器读取器抽象接口
///
/// 不同的媒体源（本地文件、内存流等）实现这个接口。
/// 每个实例只归属于一个轨道的解码泵，读取位置是实例私有的。
pub trait ContainerReader: Send {
    /// 轨道数量
    fn track_count(&self) -> usize;

    /// 获取轨道格式
    fn track_format(&self, index: usize) -> Result<TrackFormat>;

    /// 选择参与读取的轨道
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// 将当前样本读入 `buf`（覆盖原有内容）
    ///
    /// 返回：
    /// - Ok(Some(size)): 当前样本大小
    /// - Ok(None): 已到达流末尾
    /// - Err(e): 读取错误
    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>>;

    /// 当前样本的显示时间戳（微秒）
    fn sample_time_us(&self) -> Option<i64>;

    /// 当前样本所属轨道
    fn sample_track_index(&self) -> Option<usize>;

    /// 当前样本标志（关键帧 / 流结束）
    fn sample_flags(&self) -> BufferFlags {
        BufferFlags::NONE
    }

    /// 前进到下一个样本，没有更多样本时返回 false
    fn advance(&mut self) -> bool;

    /// 定位到指定时间（微秒）附近的关键帧
    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<()>;

    /// 释放底层资源
    fn release(&mut self) {}

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
